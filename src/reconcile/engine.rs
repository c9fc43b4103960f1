//! Reconciliation engine
//!
//! `ReconcileEngine` owns the retry policy, deadlines and cache for one
//! entity type and exposes the closure-based building blocks.
//! `EntityReconciler` binds an engine to a `RemoteResource` and runs
//! complete create/read/update/delete operations, verifying each one.

use super::cache::ResourceCache;
use super::error::ReconcileError;
use super::operation::Operation;
use super::outcome::{BatchReport, ReconciliationOutcome};
use super::paging::PagedFetcher;
use super::remote::RemoteResource;
use super::resource::{Entity, Page, ResourceHandle};
use super::update::{OptimisticUpdateLoop, UpdateOutcome};
use super::verify::{ConsistencyVerifier, WriteVisibility, write_visibility};
use crate::api::ApiError;
use crate::api::resilience::{ApiLogger, Attempt, ResilienceConfig, RetryPolicy, classify};
use futures::future::join_all;
use log::{debug, info};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default listing page size
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Retry policy, deadlines and cache for one entity type
#[derive(Debug, Clone)]
pub struct ReconcileEngine<T: Entity> {
    kind: String,
    cache: ResourceCache<T>,
    policy: RetryPolicy,
    config: ResilienceConfig,
    logger: ApiLogger,
}

impl<T: Entity> ReconcileEngine<T> {
    /// `cache` is shared with every other engine handed the same handle
    pub fn new(kind: impl Into<String>, config: ResilienceConfig, cache: ResourceCache<T>) -> Self {
        Self {
            kind: kind.into(),
            cache,
            policy: RetryPolicy::new(config.retry.clone()),
            logger: ApiLogger::new(config.monitoring.clone()),
            config,
        }
    }

    /// Stop every retry loop run by this engine once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.policy = self.policy.with_cancellation(token);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn cache(&self) -> &ResourceCache<T> {
        &self.cache
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn logger(&self) -> &ApiLogger {
        &self.logger
    }

    pub fn verifier(&self) -> ConsistencyVerifier<'_> {
        ConsistencyVerifier::new(&self.policy)
    }

    /// Drain the listing and record every entity in the cache.
    ///
    /// Each page is retried on transient failures within the read deadline.
    pub async fn fetch_all<F, Fut>(&self, page_fn: F, page_size: u32) -> Result<Vec<T>, ReconcileError>
    where
        F: Fn(u32, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, ApiError>>,
    {
        let fetcher = PagedFetcher::new(page_size)?;
        let deadline = self.config.deadlines.read;
        let page_fn = &page_fn;

        let items = fetcher
            .fetch_all(
                |page, size| {
                    self.policy.run(deadline, move |_| async move {
                        Attempt::from_result(page_fn(page, size).await, classify::transient)
                    })
                },
                |item| self.cache.set(item),
            )
            .await?;

        info!("Listed {} {} entities, cache now holds {}", items.len(), self.kind, self.cache.len());
        Ok(items)
    }

    /// Cached snapshot when `id` was listed, otherwise one remote lookup.
    ///
    /// A miss does not populate the cache.
    pub async fn fetch_one<L, Fut>(&self, id: &str, lookup: L) -> Result<T, ReconcileError>
    where
        L: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let cached = self.cache.get(id);
        self.logger.log_cache_lookup(&self.kind, id, cached.is_some());
        if let Some(entity) = cached {
            return Ok(entity);
        }

        let lookup = &lookup;
        self.policy
            .run(self.config.deadlines.read, move |_| async move {
                Attempt::from_result(lookup().await, classify::lookup)
            })
            .await
            .map_err(|error| error.for_resource(id))
    }

    /// Optimistic update of `id`; returns the entity the winning mutation wrote
    pub async fn update_with_retry<Req, L, LFut, B, M, MFut, C>(
        &self,
        id: &str,
        lookup: L,
        build: B,
        mutate: M,
        is_conflict: C,
        deadline: Duration,
    ) -> Result<T, ReconcileError>
    where
        L: Fn() -> LFut,
        LFut: Future<Output = Result<T, ApiError>>,
        B: Fn(&T) -> Req,
        M: Fn(T, Req) -> MFut,
        MFut: Future<Output = Result<T, ApiError>>,
        C: Fn(&ApiError) -> bool,
    {
        self.run_update(id, lookup, build, mutate, is_conflict, deadline)
            .await
            .map(|outcome| outcome.written)
    }

    async fn run_update<Req, L, LFut, B, M, MFut, C>(
        &self,
        id: &str,
        lookup: L,
        build: B,
        mutate: M,
        is_conflict: C,
        deadline: Duration,
    ) -> Result<UpdateOutcome<T>, ReconcileError>
    where
        L: Fn() -> LFut,
        LFut: Future<Output = Result<T, ApiError>>,
        B: Fn(&T) -> Req,
        M: Fn(T, Req) -> MFut,
        MFut: Future<Output = Result<T, ApiError>>,
        C: Fn(&ApiError) -> bool,
    {
        let result = OptimisticUpdateLoop::new(&self.policy)
            .run(id, deadline, lookup, build, mutate, is_conflict)
            .await;

        // A timed-out mutation may still have landed
        if self.config.cache.invalidate_on_update {
            self.cache.invalidate(id);
        }

        result
    }

    /// Poll `condition` until it yields a value.
    ///
    /// `Ok(None)` means "not yet"; errors are retried while `is_retryable`
    /// accepts them.
    pub async fn poll_until<V, F, Fut, C>(&self, deadline: Duration, condition: F, is_retryable: C) -> Result<V, ReconcileError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<V>, ApiError>>,
        C: Fn(&ApiError) -> bool,
    {
        let (condition, is_retryable) = (&condition, &is_retryable);

        self.policy
            .run(deadline, move |attempt| async move {
                match condition().await {
                    Ok(Some(value)) => Attempt::Ready(value),
                    Ok(None) => Attempt::Retry(ApiError::pending(format!("condition not met on poll {}", attempt))),
                    Err(error) if is_retryable(&error) => Attempt::Retry(error),
                    Err(error) => Attempt::Abort(error),
                }
            })
            .await
    }
}

/// Complete, verified operations against one `RemoteResource`
pub struct EntityReconciler<R: RemoteResource> {
    remote: R,
    engine: ReconcileEngine<R::Entity>,
    page_size: u32,
}

impl<R: RemoteResource> EntityReconciler<R> {
    pub fn new(remote: R, config: ResilienceConfig, cache: ResourceCache<R::Entity>) -> Self {
        let engine = ReconcileEngine::new(remote.kind(), config, cache);
        Self {
            remote,
            engine,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.engine = self.engine.with_cancellation(token);
        self
    }

    pub fn engine(&self) -> &ReconcileEngine<R::Entity> {
        &self.engine
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn cache(&self) -> &ResourceCache<R::Entity> {
        self.engine.cache()
    }

    /// Create a resource and wait until a read returns it.
    ///
    /// The create call is retried only when the server rejected it
    /// unprocessed (429, 503). Other transient failures may have created the
    /// resource anyway and come back as `TimedOut`, to be rerun later.
    pub async fn create(&self, desired: &R::Request) -> Result<ResourceHandle, ReconcileError> {
        self.create_tracked(desired).await.map(|(handle, _)| handle)
    }

    /// Single resource, from the cache when it was listed
    pub async fn read(&self, id: &str) -> Result<R::Entity, ReconcileError> {
        self.engine.fetch_one(id, || self.remote.lookup(id)).await
    }

    /// Every resource of this type; warms the cache
    pub async fn list(&self) -> Result<Vec<R::Entity>, ReconcileError> {
        self.engine
            .fetch_all(|page, size| self.remote.list_page(page, size), self.page_size)
            .await
    }

    /// Update under optimistic concurrency, then wait until the write is visible
    pub async fn update(&self, id: &str, desired: &R::Request) -> Result<ResourceHandle, ReconcileError> {
        self.update_tracked(id, desired).await.map(|(handle, _)| handle)
    }

    /// Delete, then wait until the resource is absent. Already absent is success.
    pub async fn delete(&self, id: &str) -> Result<ResourceHandle, ReconcileError> {
        self.delete_tracked(id).await.map(|(handle, _)| handle)
    }

    /// Run one operation and classify its outcome
    pub async fn apply(&self, operation: Operation<R::Request>) -> ReconciliationOutcome {
        let context = self
            .engine
            .logger
            .start_operation(operation.operation_type(), &self.engine.kind, operation.id());

        let result = match &operation {
            Operation::Create { desired } => self.create_tracked(desired).await,
            Operation::Read { id } => self.read(id).await.map(|entity| (entity.handle(), 1)),
            Operation::Update { id, desired } => self.update_tracked(id, desired).await,
            Operation::Delete { id } => self.delete_tracked(id).await,
        };

        let (result, attempts) = match result {
            Ok((handle, attempts)) => (Ok(handle), attempts),
            Err(error) => {
                let attempts = error.attempts().unwrap_or(1);
                (Err(error), attempts)
            }
        };

        let outcome = ReconciliationOutcome::new(
            operation.operation_type(),
            operation.id().map(str::to_string),
            result,
        );
        let metrics = context.create_metrics(
            attempts,
            outcome.kind(),
            outcome.result.as_ref().err().map(ToString::to_string),
        );
        self.engine.logger.complete_operation(&context, &metrics);

        outcome
    }

    /// Run every operation concurrently; one outcome per operation, in order
    pub async fn reconcile_all(&self, operations: Vec<Operation<R::Request>>) -> BatchReport {
        let start = Instant::now();
        let outcomes = join_all(operations.into_iter().map(|operation| self.apply(operation))).await;

        let report = BatchReport::new(outcomes);
        self.engine
            .logger
            .log_batch_operation(&self.engine.kind, &report.summary(), start.elapsed());
        report
    }

    async fn create_tracked(&self, desired: &R::Request) -> Result<(ResourceHandle, u32), ReconcileError> {
        let remote = &self.remote;
        let start = Instant::now();
        let tries = &AtomicU32::new(0);

        let (created, attempts) = self
            .engine
            .policy
            .run(self.engine.config.deadlines.update, move |attempt| async move {
                tries.store(attempt, Ordering::Relaxed);
                match remote.create(desired).await {
                    Ok(created) => Attempt::Ready((created, attempt)),
                    Err(error) => Attempt::from_result(Err(error), classify::unprocessed),
                }
            })
            .await
            .map_err(|error| error.into_unconfirmed(tries.load(Ordering::Relaxed), start.elapsed()))?;
        let id = created.id().to_string();
        debug!("Created {} '{}', confirming visibility", self.engine.kind, id);

        let observed = self
            .engine
            .verifier()
            .confirm_present(
                &id,
                self.engine.config.deadlines.verify,
                || remote.lookup(&id),
                |observed: &R::Entity| {
                    if remote.matches(desired, observed) {
                        Ok(())
                    } else {
                        Err(format!("'{}' does not reflect the created state yet", observed.id()))
                    }
                },
            )
            .await?;

        Ok((observed.handle(), attempts))
    }

    async fn update_tracked(&self, id: &str, desired: &R::Request) -> Result<(ResourceHandle, u32), ReconcileError> {
        let remote = &self.remote;

        let UpdateOutcome {
            previous,
            written,
            attempts,
        } = self
            .engine
            .run_update(
                id,
                || remote.lookup(id),
                |current: &R::Entity| remote.build_update(current, desired),
                move |current: R::Entity, request: R::Request| async move { remote.update(&current, &request).await },
                |error: &ApiError| remote.is_conflict(error),
                self.engine.config.deadlines.update,
            )
            .await?;

        let observed = self
            .engine
            .verifier()
            .confirm_present(
                id,
                self.engine.config.deadlines.verify,
                || remote.lookup(id),
                |observed: &R::Entity| match write_visibility(&previous, &written, observed) {
                    WriteVisibility::Confirmed => Ok(()),
                    WriteVisibility::Stale => Err(format!("'{}' still at replaced version {:?}", id, observed.version())),
                    WriteVisibility::Unknown if remote.matches(desired, observed) => Ok(()),
                    WriteVisibility::Unknown => Err(format!("'{}' does not reflect the update yet", id)),
                },
            )
            .await?;

        Ok((observed.handle(), attempts))
    }

    async fn delete_tracked(&self, id: &str) -> Result<(ResourceHandle, u32), ReconcileError> {
        let remote = &self.remote;
        let deadline = self.engine.config.deadlines.delete;

        let deleted = self
            .engine
            .policy
            .run(deadline, move |attempt| async move {
                match remote.delete(id).await {
                    Ok(()) => Attempt::Ready(attempt),
                    Err(error) if error.is_not_found() => {
                        debug!("Delete of '{}' found it already absent", id);
                        Attempt::Ready(attempt)
                    }
                    Err(error) => Attempt::from_result(Err(error), classify::transient),
                }
            })
            .await;

        // Drop the listing snapshot before confirming absence
        self.engine.cache.invalidate(id);
        let attempts = deleted.map_err(|error| error.for_resource(id))?;

        self.engine
            .verifier()
            .confirm_absent(id, deadline, || remote.lookup(id))
            .await?;

        Ok((ResourceHandle::deleted(id), attempts))
    }
}
