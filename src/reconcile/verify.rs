//! Read-after-write confirmation
//!
//! The remote system is not linearizable: a successful write response does
//! not mean the next read sees it. These checks re-read under the retry
//! policy and only report success once the write is observable.

use super::error::ReconcileError;
use super::resource::Entity;
use crate::api::ApiError;
use crate::api::resilience::{Attempt, RetryPolicy};
use log::debug;
use std::future::Future;
use std::time::Duration;

/// What a post-update read says about the write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVisibility {
    /// Observed version is the one the mutation returned
    Confirmed,
    /// Observed version is the one the mutation replaced
    Stale,
    /// No version evidence either way
    Unknown,
}

/// Compare versions of the pre-write snapshot, the mutation response and a
/// fresh read
pub fn write_visibility<T: Entity>(previous: &T, written: &T, observed: &T) -> WriteVisibility {
    match (previous.version(), written.version(), observed.version()) {
        (_, Some(written), Some(observed)) if written == observed => WriteVisibility::Confirmed,
        (Some(previous), written, Some(observed)) if previous == observed && written != Some(previous) => {
            WriteVisibility::Stale
        }
        _ => WriteVisibility::Unknown,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsistencyVerifier<'a> {
    policy: &'a RetryPolicy,
}

impl<'a> ConsistencyVerifier<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self { policy }
    }

    /// Re-read until the resource exists, is not deleted, and passes `check`.
    ///
    /// `check` returns the reason the observation is not converged yet. A
    /// not-found read counts as "not visible yet". Giving up at `deadline`
    /// yields `ReconcileError::Inconsistent`.
    pub async fn confirm_present<T, L, LFut, C>(
        &self,
        id: &str,
        deadline: Duration,
        lookup: L,
        check: C,
    ) -> Result<T, ReconcileError>
    where
        T: Entity,
        L: Fn() -> LFut,
        LFut: Future<Output = Result<T, ApiError>>,
        C: Fn(&T) -> Result<(), String>,
    {
        let (lookup, check) = (&lookup, &check);

        self.policy
            .run(deadline, move |attempt| async move {
                match lookup().await {
                    Ok(observed) if observed.lifecycle().is_deleted() => {
                        Attempt::Retry(ApiError::pending("resource reports a deleted lifecycle"))
                    }
                    Ok(observed) => match check(&observed) {
                        Ok(()) => {
                            debug!("Write to '{}' visible after {} reads", observed.id(), attempt);
                            Attempt::Ready(observed)
                        }
                        Err(reason) => Attempt::Retry(ApiError::Pending(reason)),
                    },
                    Err(error) if error.is_not_found() || error.is_transient() => Attempt::Retry(error),
                    Err(error) => Attempt::Abort(error),
                }
            })
            .await
            .map_err(|error| error.into_inconsistent(id))
    }

    /// Re-read until the resource is absent or reports a deleted lifecycle.
    ///
    /// Either observation is accepted on first sight.
    pub async fn confirm_absent<T, L, LFut>(&self, id: &str, deadline: Duration, lookup: L) -> Result<(), ReconcileError>
    where
        T: Entity,
        L: Fn() -> LFut,
        LFut: Future<Output = Result<T, ApiError>>,
    {
        let lookup = &lookup;

        self.policy
            .run(deadline, move |attempt| async move {
                match lookup().await {
                    Err(error) if error.is_not_found() => {
                        debug!("Delete confirmed absent after {} reads", attempt);
                        Attempt::Ready(())
                    }
                    Ok(observed) if observed.lifecycle().is_deleted() => Attempt::Ready(()),
                    Ok(observed) => Attempt::Retry(ApiError::pending(format!(
                        "'{}' still {:?}",
                        observed.id(),
                        observed.lifecycle()
                    ))),
                    Err(error) if error.is_transient() => Attempt::Retry(error),
                    Err(error) => Attempt::Abort(error),
                }
            })
            .await
            .map_err(|error| error.into_inconsistent(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::resilience::RetryConfig;
    use crate::reconcile::{LifecycleState, OutcomeKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        version: Option<String>,
        state: LifecycleState,
    }

    impl Entity for Item {
        fn id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> Option<&str> {
            self.version.as_deref()
        }

        fn lifecycle(&self) -> LifecycleState {
            self.state
        }
    }

    fn item(version: Option<&str>, state: LifecycleState) -> Item {
        Item {
            id: "item-1".to_string(),
            version: version.map(str::to_string),
            state,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::fixed(Duration::from_millis(100)))
    }

    #[derive(Clone)]
    enum Read {
        Missing,
        Denied,
        Found(Item),
    }

    /// Lookup that answers from `script` by call number, repeating the last entry
    fn scripted(calls: Arc<AtomicU32>, script: Vec<Read>) -> impl Fn() -> std::future::Ready<Result<Item, ApiError>> {
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let result = match &script[call.min(script.len() - 1)] {
                Read::Missing => Err(ApiError::from_status(404, "not replicated")),
                Read::Denied => Err(ApiError::from_status(403, "forbidden")),
                Read::Found(item) => Ok(item.clone()),
            };
            std::future::ready(result)
        }
    }

    #[test]
    fn test_write_visibility() {
        let previous = item(Some("1"), LifecycleState::Active);
        let written = item(Some("2"), LifecycleState::Active);

        assert_eq!(write_visibility(&previous, &written, &written), WriteVisibility::Confirmed);
        assert_eq!(write_visibility(&previous, &written, &previous), WriteVisibility::Stale);
        assert_eq!(
            write_visibility(&previous, &written, &item(Some("3"), LifecycleState::Active)),
            WriteVisibility::Unknown
        );

        let unversioned = item(None, LifecycleState::Active);
        assert_eq!(write_visibility(&unversioned, &unversioned, &unversioned), WriteVisibility::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_after_stale_reads() {
        let calls = Arc::new(AtomicU32::new(0));
        let lookup = scripted(
            calls.clone(),
            vec![
                Read::Missing,
                Read::Found(item(Some("1"), LifecycleState::Active)),
                Read::Found(item(Some("2"), LifecycleState::Active)),
            ],
        );

        let observed = ConsistencyVerifier::new(&policy())
            .confirm_present("item-1", Duration::from_secs(5), lookup, |observed: &Item| {
                match observed.version() {
                    Some("2") => Ok(()),
                    other => Err(format!("at version {:?}", other)),
                }
            })
            .await
            .unwrap();

        assert_eq!(observed.version(), Some("2"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_lifecycle_never_converges() {
        let calls = Arc::new(AtomicU32::new(0));
        let lookup = scripted(calls, vec![Read::Found(item(Some("1"), LifecycleState::Deleted))]);

        let error = ConsistencyVerifier::new(&policy())
            .confirm_present("item-1", Duration::from_secs(1), lookup, |_: &Item| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), OutcomeKind::Inconsistent);
        assert!(matches!(error, ReconcileError::Inconsistent { ref id, .. } if id == "item-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_terminal_read_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let lookup = scripted(calls.clone(), vec![Read::Denied]);

        let error = ConsistencyVerifier::new(&policy())
            .confirm_present("item-1", Duration::from_secs(1), lookup, |_: &Item| Ok(()))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), OutcomeKind::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_on_first_not_found() {
        let calls = Arc::new(AtomicU32::new(0));
        let lookup = scripted(calls.clone(), vec![Read::Missing]);

        ConsistencyVerifier::new(&policy())
            .confirm_absent("item-1", Duration::from_secs(5), lookup)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_after_draining() {
        let calls = Arc::new(AtomicU32::new(0));
        let lookup = scripted(
            calls.clone(),
            vec![
                Read::Found(item(Some("1"), LifecycleState::Active)),
                Read::Found(item(Some("1"), LifecycleState::Deleting)),
                Read::Found(item(Some("1"), LifecycleState::Deleted)),
            ],
        );

        ConsistencyVerifier::new(&policy())
            .confirm_absent("item-1", Duration::from_secs(5), lookup)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_gives_up_as_inconsistent() {
        let calls = Arc::new(AtomicU32::new(0));
        let lookup = scripted(calls, vec![Read::Found(item(None, LifecycleState::Deleting))]);

        let error = ConsistencyVerifier::new(&policy())
            .confirm_absent("item-1", Duration::from_secs(1), lookup)
            .await
            .unwrap_err();

        match error {
            ReconcileError::Inconsistent { last, .. } => {
                assert!(matches!(last, ApiError::Pending(_)));
            }
            other => panic!("expected inconsistency, got {:?}", other),
        }
    }
}
