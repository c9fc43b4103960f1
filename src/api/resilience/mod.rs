//! Production resilience and hardening features
//!
//! Provides deadline-bounded retry policies, operation deadlines and
//! structured monitoring for reconciliation against remote APIs.

pub mod config;
pub mod logging;
pub mod retry;

pub use config::{DeadlineConfig, LogLevel, MonitoringConfig, ResilienceConfig, ResilienceConfigBuilder};
pub use logging::{ApiLogger, OperationContext, OperationMetrics};
pub use retry::{Attempt, RetryConfig, RetryPolicy, RetryableError, classify};
