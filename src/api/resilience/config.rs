//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retry policies, operation deadlines,
//! cache policy and monitoring features with sane defaults.

use super::retry::RetryConfig;
use crate::reconcile::CachePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global resilience configuration for reconciliation operations
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub deadlines: DeadlineConfig,
    pub cache: CachePolicy,
    pub monitoring: MonitoringConfig,
}

/// Upper bound on each bounded operation
#[derive(Debug, Clone)]
pub struct DeadlineConfig {
    /// Optimistic update loop, including conflict retries
    pub update: Duration,
    /// Read-after-write confirmation for create and update
    pub verify: Duration,
    /// Delete request plus absence confirmation
    pub delete: Duration,
    /// Point lookups and listing pages
    pub read: Duration,
}

/// Monitoring and logging configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub correlation_ids: bool,
    pub request_logging: bool,
    pub performance_metrics: bool,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            deadlines: DeadlineConfig::default(),
            cache: CachePolicy::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            update: Duration::from_secs(30),
            verify: Duration::from_secs(30),
            delete: Duration::from_secs(60),
            read: Duration::from_secs(15),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            correlation_ids: true,
            request_logging: true,
            performance_metrics: true,
            log_level: LogLevel::Info,
        }
    }
}

impl ResilienceConfig {
    /// Create a new builder for ResilienceConfig
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Conservative config for production environments
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            deadlines: DeadlineConfig {
                update: Duration::from_secs(60),
                verify: Duration::from_secs(60),
                delete: Duration::from_secs(120),
                read: Duration::from_secs(30),
            },
            cache: CachePolicy::default(),
            monitoring: MonitoringConfig {
                correlation_ids: true,
                request_logging: true,
                performance_metrics: true,
                log_level: LogLevel::Warn, // Less verbose in production
            },
        }
    }

    /// Aggressive config for development/testing
    pub fn development() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            deadlines: DeadlineConfig {
                update: Duration::from_secs(10),
                verify: Duration::from_secs(10),
                delete: Duration::from_secs(20),
                read: Duration::from_secs(5),
            },
            cache: CachePolicy::default(),
            monitoring: MonitoringConfig {
                correlation_ids: true,
                request_logging: true,
                performance_metrics: true,
                log_level: LogLevel::Debug, // More verbose for debugging
            },
        }
    }

    /// Single attempt per step and quiet logging (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig {
                min_attempts: 1,
                base_delay: Duration::from_millis(0),
                max_delay: Duration::from_millis(0),
                backoff_multiplier: 1.0,
                jitter: false,
            },
            deadlines: DeadlineConfig {
                update: Duration::from_millis(1),
                verify: Duration::from_millis(1),
                delete: Duration::from_millis(1),
                read: Duration::from_millis(1),
            },
            cache: CachePolicy::default(),
            monitoring: MonitoringConfig {
                correlation_ids: false,
                request_logging: false,
                performance_metrics: false,
                log_level: LogLevel::Error,
            },
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
        }
    }

    /// Configure retry behavior
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Constant backoff without jitter
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.retry = RetryConfig {
            min_attempts: self.config.retry.min_attempts,
            ..RetryConfig::fixed(delay)
        };
        self
    }

    pub fn min_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.min_attempts = attempts;
        self
    }

    /// Configure all deadlines at once
    pub fn deadlines(mut self, deadlines: DeadlineConfig) -> Self {
        self.config.deadlines = deadlines;
        self
    }

    pub fn update_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadlines.update = deadline;
        self
    }

    pub fn verify_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadlines.verify = deadline;
        self
    }

    pub fn delete_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadlines.delete = deadline;
        self
    }

    pub fn read_deadline(mut self, deadline: Duration) -> Self {
        self.config.deadlines.read = deadline;
        self
    }

    /// Drop cache entries after successful updates
    pub fn invalidate_on_update(mut self, enabled: bool) -> Self {
        self.config.cache.invalidate_on_update = enabled;
        self
    }

    /// Configure monitoring
    pub fn monitoring_config(mut self, monitoring: MonitoringConfig) -> Self {
        self.config.monitoring = monitoring;
        self
    }

    /// Enable/disable correlation IDs
    pub fn correlation_ids(mut self, enabled: bool) -> Self {
        self.config.monitoring.correlation_ids = enabled;
        self
    }

    /// Enable/disable request logging
    pub fn request_logging(mut self, enabled: bool) -> Self {
        self.config.monitoring.request_logging = enabled;
        self
    }

    /// Enable/disable performance metrics
    pub fn performance_metrics(mut self, enabled: bool) -> Self {
        self.config.monitoring.performance_metrics = enabled;
        self
    }

    /// Set logging level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.monitoring.log_level = level;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}

impl Default for ResilienceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
