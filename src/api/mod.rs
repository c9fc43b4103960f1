//! Dynamics 365 Web API access
//!
//! A pooled HTTP client with entity-set adapters, the remote error type the
//! reconciliation engine classifies, and the resilience layer (retry
//! policy, deadlines, structured logging).

pub mod client;
pub mod constants;
pub mod error;
pub mod resilience;

pub use client::{DynamicsClient, EntitySet, Record};
pub use error::ApiError;
pub use resilience::{
    ApiLogger, DeadlineConfig, LogLevel, MonitoringConfig, OperationContext, OperationMetrics, ResilienceConfig,
    RetryConfig, RetryPolicy, RetryableError,
};
