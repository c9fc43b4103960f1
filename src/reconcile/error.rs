//! Terminal error taxonomy for reconciliation operations

use crate::api::ApiError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of one reconciliation step.
///
/// Retryable conditions never surface here; every variant that gave up on a
/// retryable condition carries the last underlying error as its source.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("resource '{id}' not found")]
    NotFound { id: String },

    #[error("update of '{id}' still conflicting after {attempts} attempts in {elapsed:?}")]
    ConflictExhausted {
        id: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: ApiError,
    },

    #[error("'{id}' did not converge after {attempts} reads in {elapsed:?}")]
    Inconsistent {
        id: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: ApiError,
    },

    #[error("gave up after {attempts} attempts in {elapsed:?}")]
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        #[source]
        last: ApiError,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    #[error("remote call failed: {0}")]
    Failed(#[source] ApiError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Classification reported once per resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Converged,
    NotFound,
    ConflictExhausted,
    Inconsistent,
    TimedOut,
    Cancelled,
    Failed,
    InvalidArgument,
}

impl OutcomeKind {
    /// Still converging: rerunning the whole operation later may succeed
    pub fn retry_later(&self) -> bool {
        matches!(
            self,
            OutcomeKind::ConflictExhausted | OutcomeKind::TimedOut | OutcomeKind::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Converged => "converged",
            OutcomeKind::NotFound => "not_found",
            OutcomeKind::ConflictExhausted => "conflict_exhausted",
            OutcomeKind::Inconsistent => "inconsistent",
            OutcomeKind::TimedOut => "timed_out",
            OutcomeKind::Cancelled => "cancelled",
            OutcomeKind::Failed => "failed",
            OutcomeKind::InvalidArgument => "invalid_argument",
        }
    }
}

impl ReconcileError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            ReconcileError::NotFound { .. } => OutcomeKind::NotFound,
            ReconcileError::ConflictExhausted { .. } => OutcomeKind::ConflictExhausted,
            ReconcileError::Inconsistent { .. } => OutcomeKind::Inconsistent,
            ReconcileError::TimedOut { .. } => OutcomeKind::TimedOut,
            ReconcileError::Cancelled { .. } => OutcomeKind::Cancelled,
            ReconcileError::Failed(_) => OutcomeKind::Failed,
            ReconcileError::InvalidArgument(_) => OutcomeKind::InvalidArgument,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }

    /// Number of remote attempts made before giving up, when known
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ReconcileError::ConflictExhausted { attempts, .. }
            | ReconcileError::Inconsistent { attempts, .. }
            | ReconcileError::TimedOut { attempts, .. }
            | ReconcileError::Cancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }

    /// Attach the resource identity: a terminal 404 becomes `NotFound`
    pub fn for_resource(self, id: &str) -> Self {
        match self {
            ReconcileError::Failed(ApiError::NotFound(_)) => ReconcileError::NotFound { id: id.to_string() },
            other => other,
        }
    }

    /// A non-idempotent call failed transiently and may have landed: report
    /// it as timed out so the caller reruns the operation later
    pub(crate) fn into_unconfirmed(self, attempts: u32, elapsed: Duration) -> Self {
        match self {
            ReconcileError::Failed(last) if last.is_transient() => ReconcileError::TimedOut {
                attempts,
                elapsed,
                last,
            },
            other => other,
        }
    }

    /// Read-after-write gave up: a timeout becomes `Inconsistent`
    pub(crate) fn into_inconsistent(self, id: &str) -> Self {
        match self {
            ReconcileError::TimedOut { attempts, elapsed, last } => ReconcileError::Inconsistent {
                id: id.to_string(),
                attempts,
                elapsed,
                last,
            },
            other => other.for_resource(id),
        }
    }
}
