//! Per-resource outcomes and batch reports

use super::error::{OutcomeKind, ReconcileError};
use super::resource::ResourceHandle;
use serde::Serialize;
use std::collections::BTreeMap;

/// Exactly one of these is produced per operation in a batch
#[derive(Debug)]
pub struct ReconciliationOutcome {
    pub operation: &'static str,
    /// Target id, or the assigned id once a create converged
    pub id: Option<String>,
    pub result: Result<ResourceHandle, ReconcileError>,
}

impl ReconciliationOutcome {
    pub fn new(operation: &'static str, id: Option<String>, result: Result<ResourceHandle, ReconcileError>) -> Self {
        let id = match &result {
            Ok(handle) => Some(handle.id.clone()),
            Err(_) => id,
        };
        Self { operation, id, result }
    }

    pub fn kind(&self) -> OutcomeKind {
        match &self.result {
            Ok(_) => OutcomeKind::Converged,
            Err(error) => error.kind(),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.result.is_ok()
    }

    /// Rerunning this operation later may still converge
    pub fn retry_later(&self) -> bool {
        self.kind().retry_later()
    }
}

/// Outcomes of one `reconcile_all` run, in submission order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ReconciliationOutcome>,
}

/// Serializable counts over a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub converged: usize,
    pub retry_later: usize,
    /// Terminal failures, not worth retrying as-is
    pub failed: usize,
    pub by_outcome: BTreeMap<String, usize>,
}

impl BatchReport {
    pub fn new(outcomes: Vec<ReconciliationOutcome>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.outcomes.len(),
            ..Default::default()
        };

        for outcome in &self.outcomes {
            let kind = outcome.kind();
            *summary.by_outcome.entry(kind.as_str().to_string()).or_insert(0) += 1;

            if kind == OutcomeKind::Converged {
                summary.converged += 1;
            } else if kind.retry_later() {
                summary.retry_later += 1;
            } else {
                summary.failed += 1;
            }
        }

        summary
    }

    /// Ids whose operation should be rerun by the caller
    pub fn retry_later_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.retry_later())
            .filter_map(|outcome| outcome.id.as_deref())
            .collect()
    }

    /// Outcomes that ended in a terminal failure
    pub fn failed(&self) -> Vec<&ReconciliationOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.is_converged() && !outcome.retry_later())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use std::time::Duration;

    fn converged(id: &str) -> ReconciliationOutcome {
        ReconciliationOutcome::new("update", Some(id.to_string()), Ok(ResourceHandle::deleted(id)))
    }

    fn failed(id: &str, error: ReconcileError) -> ReconciliationOutcome {
        ReconciliationOutcome::new("update", Some(id.to_string()), Err(error))
    }

    #[test]
    fn test_created_outcome_takes_assigned_id() {
        let outcome = ReconciliationOutcome::new("create", None, Ok(ResourceHandle::deleted("new-1")));
        assert_eq!(outcome.id.as_deref(), Some("new-1"));
        assert_eq!(outcome.kind(), OutcomeKind::Converged);
    }

    #[test]
    fn test_summary_counts() {
        let report = BatchReport::new(vec![
            converged("a"),
            converged("b"),
            failed(
                "c",
                ReconcileError::ConflictExhausted {
                    id: "c".to_string(),
                    attempts: 4,
                    elapsed: Duration::from_secs(2),
                    last: ApiError::from_status(412, "Precondition Failed"),
                },
            ),
            failed("d", ReconcileError::NotFound { id: "d".to_string() }),
            failed("e", ReconcileError::Cancelled { attempts: 1 }),
        ]);

        let summary = report.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.converged, 2);
        assert_eq!(summary.retry_later, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_outcome.get("converged"), Some(&2));
        assert_eq!(summary.by_outcome.get("not_found"), Some(&1));

        assert_eq!(report.retry_later_ids(), vec!["c", "e"]);
        assert_eq!(report.failed().len(), 1);
        assert_eq!(report.failed()[0].id.as_deref(), Some("d"));
    }

    #[test]
    fn test_summary_serializes() {
        let report = BatchReport::new(vec![converged("a")]);
        let value = serde_json::to_value(report.summary()).unwrap();

        assert_eq!(value["total"], 1);
        assert_eq!(value["by_outcome"]["converged"], 1);
    }
}
