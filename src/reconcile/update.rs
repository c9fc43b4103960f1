//! Optimistic-concurrency update loop
//!
//! Every attempt re-reads the resource, rebuilds the request against the
//! fresh version, and issues the mutation. A version conflict restarts the
//! cycle; anything else ends it.

use super::error::ReconcileError;
use super::resource::Entity;
use crate::api::ApiError;
use crate::api::resilience::{Attempt, RetryPolicy, classify};
use log::{debug, info};
use std::future::Future;
use std::time::Duration;

/// Result of a successful update loop
#[derive(Debug, Clone)]
pub struct UpdateOutcome<T> {
    /// Snapshot the winning mutation was built from
    pub previous: T,
    /// Entity returned by the mutation
    pub written: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct OptimisticUpdateLoop<'a> {
    policy: &'a RetryPolicy,
}

impl<'a> OptimisticUpdateLoop<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy }
    }

    /// Fetch current → build request → mutate, repeated on conflict.
    ///
    /// A lookup that reports not-found (or a deleted lifecycle) ends the loop
    /// with `ReconcileError::NotFound`. Running out of `deadline` while the
    /// last failure was a conflict yields `ConflictExhausted`; other
    /// transient failures yield `TimedOut`.
    pub async fn run<T, Req, L, LFut, B, M, MFut, C>(
        &self,
        id: &str,
        deadline: Duration,
        lookup: L,
        build: B,
        mutate: M,
        is_conflict: C,
    ) -> Result<UpdateOutcome<T>, ReconcileError>
    where
        T: Entity,
        L: Fn() -> LFut,
        LFut: Future<Output = Result<T, ApiError>>,
        B: Fn(&T) -> Req,
        M: Fn(T, Req) -> MFut,
        MFut: Future<Output = Result<T, ApiError>>,
        C: Fn(&ApiError) -> bool,
    {
        let (lookup, build, mutate, is_conflict) = (&lookup, &build, &mutate, &is_conflict);

        let result = self
            .policy
            .run(deadline, move |attempt| async move {
                let current = match lookup().await {
                    Ok(current) => current,
                    Err(error) if classify::lookup(&error) => return Attempt::Retry(error),
                    Err(error) => return Attempt::Abort(error),
                };

                if current.lifecycle().is_deleted() {
                    return Attempt::Abort(ApiError::NotFound(format!(
                        "'{}' reports a deleted lifecycle",
                        current.id()
                    )));
                }

                let request = build(&current);
                debug!(
                    "Updating '{}' against version {:?} (attempt {})",
                    current.id(),
                    current.version(),
                    attempt
                );

                let previous = current.clone();
                match mutate(current, request).await {
                    Ok(written) => Attempt::Ready(UpdateOutcome {
                        previous,
                        written,
                        attempts: attempt,
                    }),
                    Err(error) if is_conflict(&error) => {
                        info!(
                            "Version conflict updating '{}' at {:?}, re-reading",
                            previous.id(),
                            previous.version()
                        );
                        Attempt::Retry(error)
                    }
                    Err(error) if error.is_transient() => Attempt::Retry(error),
                    Err(error) => Attempt::Abort(error),
                }
            })
            .await;

        result.map_err(|error| match error {
            ReconcileError::TimedOut {
                attempts,
                elapsed,
                last,
            } if is_conflict(&last) => ReconcileError::ConflictExhausted {
                id: id.to_string(),
                attempts,
                elapsed,
                last,
            },
            other => other.for_resource(id),
        })
    }
}
