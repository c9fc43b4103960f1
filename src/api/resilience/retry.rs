//! Retry policies with exponential backoff
//!
//! Deadline-bounded retry loop used by every reconciliation step. The unit of
//! work classifies its own outcome as `Ready`, `Retry` or `Abort`; the policy
//! owns the backoff, the deadline and cancellation.

use crate::api::ApiError;
use crate::reconcile::ReconcileError;
use log::{debug, info, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts made even if the deadline has already passed
    pub min_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_attempts: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Conservative config for production
    pub fn conservative() -> Self {
        Self {
            min_attempts: 2,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            jitter: true,
        }
    }

    /// Aggressive config for development/testing
    pub fn aggressive() -> Self {
        Self {
            min_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.5,
            jitter: true,
        }
    }

    /// Constant delay between attempts, no jitter
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min_attempts: 2,
            base_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Types of errors and their retry behavior
#[derive(Debug, Clone, PartialEq)]
pub enum RetryableError {
    /// Network-level errors (connection timeout, DNS, etc)
    Network,
    /// HTTP 5xx server errors
    ServerError(u16),
    /// HTTP 429 Too Many Requests
    RateLimited,
    /// HTTP 408 Request Timeout
    Timeout,
    /// Read succeeded but the write is not visible yet
    NotConverged,
    /// Non-retryable client errors (4xx except 408, 429)
    ClientError(u16),
    /// Authentication/authorization errors
    AuthError,
    /// Unknown/other errors
    Unknown,
}

impl RetryableError {
    /// Determine if this error type should be retried
    pub fn should_retry(&self) -> bool {
        match self {
            RetryableError::Network => true,
            RetryableError::ServerError(_) => true,
            RetryableError::RateLimited => true,
            RetryableError::Timeout => true,
            RetryableError::NotConverged => true,
            RetryableError::ClientError(_) => false,
            RetryableError::AuthError => false,
            RetryableError::Unknown => false,
        }
    }

    /// Classify an HTTP status code into retry behavior
    pub fn from_status_code(status: u16) -> Self {
        match status {
            401 | 403 => RetryableError::AuthError,
            408 => RetryableError::Timeout,
            429 => RetryableError::RateLimited,
            400..=499 => RetryableError::ClientError(status),
            500..=599 => RetryableError::ServerError(status),
            _ => RetryableError::Unknown,
        }
    }
}

/// Classifier functions handed to `RetryPolicy` call sites.
///
/// Every call site supplies one `Fn(&ApiError) -> bool` returning true for
/// retryable errors; these are the shared ones.
pub mod classify {
    use crate::api::ApiError;

    /// Generic transient failures only
    pub fn transient(error: &ApiError) -> bool {
        error.is_transient()
    }

    /// Point lookup of a resource that should exist: 404 is terminal
    pub fn lookup(error: &ApiError) -> bool {
        !error.is_not_found() && error.is_transient()
    }

    /// Polling a delete status endpoint: 404 means still draining
    pub fn delete_poll(error: &ApiError) -> bool {
        error.is_not_found() || error.is_transient()
    }

    /// Non-idempotent calls: only rejections the server answered without
    /// processing the request (429, 503)
    pub fn unprocessed(error: &ApiError) -> bool {
        matches!(error.status(), Some(429) | Some(503))
    }
}

/// Outcome of one unit of work inside a retry loop
#[derive(Debug)]
pub enum Attempt<T> {
    /// Done, return the value
    Ready(T),
    /// Retryable failure, try again after backoff
    Retry(ApiError),
    /// Terminal failure, stop immediately
    Abort(ApiError),
}

impl<T> Attempt<T> {
    /// Classify a remote call result with a retryable-error predicate
    pub fn from_result<C>(result: Result<T, ApiError>, is_retryable: C) -> Self
    where
        C: Fn(&ApiError) -> bool,
    {
        match result {
            Ok(value) => Attempt::Ready(value),
            Err(error) if is_retryable(&error) => Attempt::Retry(error),
            Err(error) => Attempt::Abort(error),
        }
    }
}

/// Retry policy that implements exponential backoff with jitter, bounded by
/// an explicit deadline per run
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    cancel: Option<CancellationToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Abort runs between attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `work` until it is ready, aborts, or `deadline` elapses.
    ///
    /// `work` receives the 1-based attempt number. On deadline exhaustion the
    /// last retryable error is returned inside `ReconcileError::TimedOut`; an
    /// `Abort` is returned as `ReconcileError::Failed`.
    pub async fn run<T, F, Fut>(&self, deadline: Duration, mut work: F) -> Result<T, ReconcileError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Attempt<T>>,
    {
        if deadline.is_zero() {
            return Err(ReconcileError::InvalidArgument(
                "deadline must be a positive duration".to_string(),
            ));
        }

        let start = Instant::now();
        let mut attempt = 0;

        loop {
            if self.is_cancelled() {
                warn!("Operation cancelled before attempt {}", attempt + 1);
                return Err(ReconcileError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            debug!("Executing operation (attempt {}, deadline {:?})", attempt, deadline);

            let last_error = match work(attempt).await {
                Attempt::Ready(value) => {
                    if attempt > 1 {
                        info!("Operation succeeded after {} attempts", attempt);
                    }
                    return Ok(value);
                }
                Attempt::Abort(error) => {
                    warn!("Operation failed permanently on attempt {}: {}", attempt, error);
                    return Err(ReconcileError::Failed(error));
                }
                Attempt::Retry(error) => error,
            };

            let elapsed = start.elapsed();
            if self.exhausted(elapsed, deadline, attempt) {
                return Err(self.timed_out(attempt, elapsed, last_error));
            }

            let delay = self.calculate_delay(attempt).min(deadline.saturating_sub(elapsed));
            warn!(
                "Operation failed on attempt {} (retryable): {}, retrying in {:?}",
                attempt, last_error, delay
            );

            if !self.pause(delay).await {
                warn!("Operation cancelled after {} attempts", attempt);
                return Err(ReconcileError::Cancelled { attempts: attempt });
            }

            let elapsed = start.elapsed();
            if self.exhausted(elapsed, deadline, attempt) {
                return Err(self.timed_out(attempt, elapsed, last_error));
            }
        }
    }

    fn exhausted(&self, elapsed: Duration, deadline: Duration, attempt: u32) -> bool {
        elapsed >= deadline && attempt >= self.config.min_attempts
    }

    fn timed_out(&self, attempts: u32, elapsed: Duration, last: ApiError) -> ReconcileError {
        warn!(
            "Operation gave up after {} attempts in {:?}: {}",
            attempts, elapsed, last
        );
        ReconcileError::TimedOut {
            attempts,
            elapsed,
            last,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| token.is_cancelled())
    }

    /// Sleep for `delay`; false if cancelled while waiting
    async fn pause(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = token.cancelled() => false,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    /// Calculate exponential backoff delay with optional jitter
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.config.base_delay.as_millis() as f64)
            * self.config.backoff_multiplier.powi(attempt as i32 - 1);

        let mut delay = Duration::from_millis(delay_ms as u64);

        if delay > self.config.max_delay {
            delay = self.config.max_delay;
        }

        // Spread concurrent reconcilers apart
        if self.config.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.5);
            let jittered_ms = (delay.as_millis() as f64 * jitter_factor) as u64;
            delay = Duration::from_millis(jittered_ms);
        }

        delay
    }
}
