//! Structured logging with correlation tracking for reconciliation operations
//!
//! Provides structured logging capabilities that include correlation IDs,
//! outcome classification, and request/response tracking for debugging.

use super::config::{LogLevel, MonitoringConfig};
use crate::reconcile::{BatchSummary, OutcomeKind};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Structured logger for API operations with correlation tracking
#[derive(Debug, Clone)]
pub struct ApiLogger {
    config: MonitoringConfig,
}

/// Context for a single reconciliation operation with correlation tracking
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Unique correlation ID for this operation
    pub correlation_id: String,
    /// Operation type (create, update, delete, etc.)
    pub operation_type: String,
    /// Entity type being operated on
    pub entity: String,
    /// Remote identifier, once known
    pub resource_id: Option<String>,
    /// Start time for performance tracking
    pub start_time: Instant,
}

/// Performance metrics for one reconciliation operation
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Total duration of the operation
    pub duration: Duration,
    /// Remote attempts made, including retries
    pub attempts: u32,
    /// Terminal classification
    pub outcome: OutcomeKind,
    /// Error message if failed
    pub error_message: Option<String>,
}

impl ApiLogger {
    /// Create a new API logger with the given configuration
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    /// Fresh correlation id, or an empty marker when correlation is disabled
    pub fn correlation_id(&self) -> String {
        if self.config.correlation_ids {
            uuid::Uuid::new_v4().to_string()
        } else {
            String::from("-")
        }
    }

    /// Start tracking a new operation
    pub fn start_operation(
        &self,
        operation_type: &str,
        entity: &str,
        resource_id: Option<&str>,
    ) -> OperationContext {
        let context = OperationContext {
            correlation_id: self.correlation_id(),
            operation_type: operation_type.to_string(),
            entity: entity.to_string(),
            resource_id: resource_id.map(str::to_string),
            start_time: Instant::now(),
        };

        if self.config.request_logging && self.should_log(LogLevel::Info) {
            let log_data = json!({
                "event": "operation_started",
                "correlation_id": context.correlation_id,
                "operation_type": context.operation_type,
                "entity": context.entity,
                "resource_id": context.resource_id,
                "timestamp": chrono::Utc::now().to_rfc3339()
            });

            info!("Reconcile Operation Started: {}", log_data);
        }

        context
    }

    /// Log HTTP request details
    pub fn log_request(&self, correlation_id: &str, method: &str, url: &str, headers: &HashMap<String, String>) {
        if !self.config.request_logging || !self.should_log(LogLevel::Debug) {
            return;
        }

        let log_data = json!({
            "event": "http_request",
            "correlation_id": correlation_id,
            "method": method,
            "url": url,
            "headers": self.sanitize_headers(headers),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        debug!("HTTP Request: {}", log_data);
    }

    /// Log HTTP response details
    pub fn log_response(&self, correlation_id: &str, status_code: u16, duration: Duration) {
        if !self.config.request_logging || !self.should_log(LogLevel::Debug) {
            return;
        }

        let log_data = json!({
            "event": "http_response",
            "correlation_id": correlation_id,
            "status_code": status_code,
            "duration_ms": duration.as_millis(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        if status_code >= 400 {
            warn!("HTTP Response (Error): {}", log_data);
        } else {
            debug!("HTTP Response: {}", log_data);
        }
    }

    /// Log a cache consultation for a point lookup
    pub fn log_cache_lookup(&self, entity: &str, resource_id: &str, hit: bool) {
        if !self.should_log(LogLevel::Trace) {
            return;
        }

        let log_data = json!({
            "event": "cache_lookup",
            "entity": entity,
            "resource_id": resource_id,
            "hit": hit,
        });

        trace!("Cache Lookup: {}", log_data);
    }

    /// Complete an operation and log metrics
    pub fn complete_operation(&self, context: &OperationContext, metrics: &OperationMetrics) {
        if !self.config.performance_metrics {
            return;
        }

        let log_data = json!({
            "event": "operation_completed",
            "correlation_id": context.correlation_id,
            "operation_type": context.operation_type,
            "entity": context.entity,
            "resource_id": context.resource_id,
            "duration_ms": metrics.duration.as_millis(),
            "attempts": metrics.attempts,
            "outcome": metrics.outcome,
            "error_message": metrics.error_message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        if metrics.outcome == OutcomeKind::Converged {
            if self.should_log(LogLevel::Info) {
                info!("Reconcile Operation Completed: {}", log_data);
            }
        } else if metrics.outcome.retry_later() {
            if self.should_log(LogLevel::Warn) {
                warn!("Reconcile Operation Incomplete: {}", log_data);
            }
        } else {
            error!("Reconcile Operation Failed: {}", log_data);
        }
    }

    /// Log batch reconciliation details
    pub fn log_batch_operation(&self, entity: &str, summary: &BatchSummary, duration: Duration) {
        if !self.config.performance_metrics || !self.should_log(LogLevel::Info) {
            return;
        }

        let log_data = json!({
            "event": "batch_operation_completed",
            "entity": entity,
            "operation_count": summary.total,
            "converged_count": summary.converged,
            "retry_later_count": summary.retry_later,
            "failed_count": summary.failed,
            "by_outcome": summary.by_outcome,
            "duration_ms": duration.as_millis(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        info!("Batch Reconciliation Completed: {}", log_data);
    }

    /// Check if we should log at the given level
    fn should_log(&self, level: LogLevel) -> bool {
        match (self.config.log_level, level) {
            (LogLevel::Error, LogLevel::Error) => true,
            (LogLevel::Warn, LogLevel::Error | LogLevel::Warn) => true,
            (LogLevel::Info, LogLevel::Error | LogLevel::Warn | LogLevel::Info) => true,
            (LogLevel::Debug, LogLevel::Error | LogLevel::Warn | LogLevel::Info | LogLevel::Debug) => true,
            (LogLevel::Trace, _) => true,
            _ => false,
        }
    }

    /// Sanitize headers to remove sensitive information
    fn sanitize_headers(&self, headers: &HashMap<String, String>) -> HashMap<String, String> {
        let mut sanitized = HashMap::new();

        for (key, value) in headers {
            let key_lower = key.to_lowercase();
            if key_lower.contains("authorization") || key_lower.contains("token") || key_lower.contains("key") {
                sanitized.insert(key.clone(), "[REDACTED]".to_string());
            } else {
                sanitized.insert(key.clone(), value.clone());
            }
        }

        sanitized
    }
}

impl OperationContext {
    /// Calculate elapsed time since operation started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Create metrics from this context
    pub fn create_metrics(&self, attempts: u32, outcome: OutcomeKind, error_message: Option<String>) -> OperationMetrics {
        OperationMetrics {
            duration: self.elapsed(),
            attempts,
            outcome,
            error_message,
        }
    }
}

impl OperationMetrics {
    /// Check if this operation was slow (exceeded typical thresholds)
    pub fn is_slow(&self, threshold: Duration) -> bool {
        self.duration > threshold
    }
}
