//! Remote call errors
//!
//! `ApiError` is what a collaborator (HTTP adapter, fake, or caller closure)
//! reports for a single remote call. The reconciliation engine classifies it
//! as retryable or terminal; it never escapes a retry loop unwrapped.

use super::resilience::RetryableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote system reports the resource as absent (HTTP 404)
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Any other non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection, DNS or request timeout failures
    #[error("network error: {0}")]
    Network(String),

    /// The read succeeded but the resource has not converged yet
    #[error("not yet converged: {0}")]
    Pending(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Build an error from an HTTP status and response body
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 404 {
            Self::NotFound(message)
        } else {
            Self::Status { status, message }
        }
    }

    pub fn pending(reason: impl Into<String>) -> Self {
        Self::Pending(reason.into())
    }

    /// Classify a reqwest error that never produced a response
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            Self::from_status(status.as_u16(), error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }

    /// HTTP status code, if this error came from a response
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound(_) => Some(404),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Retry classification shared with the HTTP resilience layer
    pub fn classify(&self) -> RetryableError {
        match self {
            Self::NotFound(_) => RetryableError::from_status_code(404),
            Self::Status { status, .. } => RetryableError::from_status_code(*status),
            Self::Network(_) => RetryableError::Network,
            Self::Pending(_) => RetryableError::NotConverged,
            Self::Other(_) => RetryableError::Unknown,
        }
    }

    /// Network errors, 408, 429, 5xx and not-yet-converged reads
    pub fn is_transient(&self) -> bool {
        self.classify().should_retry()
    }

    /// Default optimistic-concurrency conflict signal.
    ///
    /// Dynamics answers a stale `If-Match` with 412; some endpoints use 409
    /// with a message naming the version or etag instead.
    pub fn is_version_conflict(&self) -> bool {
        match self {
            Self::Status { status: 412, .. } => true,
            Self::Status { status: 409, message } => {
                let message = message.to_lowercase();
                message.contains("version") || message.contains("etag")
            }
            _ => false,
        }
    }
}
