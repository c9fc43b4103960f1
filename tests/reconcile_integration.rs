//! End-to-end reconciliation against an in-memory remote
//!
//! The fake remote versions every record, can lag reads behind writes,
//! inject version conflicts and keep deleted records draining for a while.
//! All tests run on tokio's paused clock.

use async_trait::async_trait;
use dynamics_reconciler::api::{ApiError, ResilienceConfig};
use dynamics_reconciler::reconcile::{
    Entity, EntityReconciler, LifecycleState, Operation, OutcomeKind, Page, ReconcileError, RemoteResource,
    ResourceCache,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
struct Widget {
    id: String,
    etag: String,
    revision: u32,
    name: String,
    state: LifecycleState,
}

impl Widget {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            etag: "W/\"1\"".to_string(),
            revision: 1,
            name: name.to_string(),
            state: LifecycleState::Active,
        }
    }
}

impl Entity for Widget {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> Option<&str> {
        Some(self.etag.as_str())
    }

    fn lifecycle(&self) -> LifecycleState {
        self.state
    }
}

#[derive(Debug, Clone)]
struct Desired {
    name: String,
}

fn desired(name: &str) -> Desired {
    Desired { name: name.to_string() }
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Widget>,
    next_id: u32,
    /// Reads per write that still see the pre-write snapshot
    stale_reads: u32,
    lagging: HashMap<String, (u32, Option<Widget>)>,
    conflicts: u32,
    always_conflict: bool,
    /// Reads per delete that still report `Deleting`
    delete_drain: u32,
    draining: HashMap<String, (u32, Widget)>,
    /// Errors returned by the next creates, in order, before any record is made
    create_failures: VecDeque<ApiError>,
}

#[derive(Default)]
struct FakeRemote {
    state: Mutex<State>,
    lookups: AtomicU32,
    list_calls: AtomicU32,
    creates: AtomicU32,
    updates: AtomicU32,
    deletes: AtomicU32,
}

impl FakeRemote {
    fn seeded(count: u32) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.state.lock().unwrap();
            for n in 1..=count {
                let id = format!("w-{:03}", n);
                state.records.insert(id.clone(), Widget::new(&id, &format!("widget {}", n)));
            }
            state.next_id = count;
        }
        remote
    }

    fn with_stale_reads(self, reads: u32) -> Self {
        self.state.lock().unwrap().stale_reads = reads;
        self
    }

    fn with_conflicts(self, conflicts: u32) -> Self {
        self.state.lock().unwrap().conflicts = conflicts;
        self
    }

    fn always_conflicting(self) -> Self {
        self.state.lock().unwrap().always_conflict = true;
        self
    }

    fn with_delete_drain(self, reads: u32) -> Self {
        self.state.lock().unwrap().delete_drain = reads;
        self
    }

    fn with_create_failures(self, failures: Vec<ApiError>) -> Self {
        self.state.lock().unwrap().create_failures = failures.into();
        self
    }

    fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Add a record behind the reconciler's back
    fn insert(&self, widget: Widget) {
        self.state.lock().unwrap().records.insert(widget.id.clone(), widget);
    }

    fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }

    fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteResource for FakeRemote {
    type Entity = Widget;
    type Request = Desired;

    fn kind(&self) -> &str {
        "widgets"
    }

    async fn lookup(&self, id: &str) -> Result<Widget, ApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        if let Some((remaining, snapshot)) = state.lagging.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return snapshot
                    .clone()
                    .ok_or_else(|| ApiError::from_status(404, "not replicated yet"));
            }
        }

        if let Some((remaining, snapshot)) = state.draining.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(snapshot.clone());
            }
        }

        state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::from_status(404, format!("widget '{}' does not exist", id)))
    }

    async fn list_page(&self, page: u32, page_size: u32) -> Result<Page<Widget>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();

        let skip = ((page - 1) * page_size) as usize;
        let items: Vec<Widget> = state.records.values().skip(skip).take(page_size as usize).cloned().collect();
        let has_more = skip + items.len() < state.records.len();
        Ok(Page::new(items, has_more))
    }

    async fn create(&self, request: &Desired) -> Result<Widget, ApiError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        if let Some(error) = state.create_failures.pop_front() {
            return Err(error);
        }

        state.next_id += 1;
        let id = format!("w-{:03}", state.next_id);
        let widget = Widget::new(&id, &request.name);
        state.records.insert(id.clone(), widget.clone());

        if state.stale_reads > 0 {
            let lag = state.stale_reads;
            state.lagging.insert(id, (lag, None));
        }
        Ok(widget)
    }

    async fn update(&self, current: &Widget, request: &Desired) -> Result<Widget, ApiError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        if state.always_conflict || state.conflicts > 0 {
            state.conflicts = state.conflicts.saturating_sub(1);
            return Err(ApiError::from_status(412, "Precondition Failed"));
        }

        let Some(stored) = state.records.get(&current.id).cloned() else {
            return Err(ApiError::from_status(404, "gone"));
        };
        if stored.etag != current.etag {
            return Err(ApiError::from_status(412, "Precondition Failed"));
        }

        let revision = stored.revision + 1;
        let written = Widget {
            etag: format!("W/\"{}\"", revision),
            revision,
            name: request.name.clone(),
            ..stored.clone()
        };
        state.records.insert(written.id.clone(), written.clone());

        if state.stale_reads > 0 {
            let lag = state.stale_reads;
            state.lagging.insert(written.id.clone(), (lag, Some(stored)));
        }
        Ok(written)
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        let Some(removed) = state.records.remove(id) else {
            return Err(ApiError::from_status(404, "already gone"));
        };
        state.lagging.remove(id);

        if state.delete_drain > 0 {
            let drain = state.delete_drain;
            let draining = Widget {
                state: LifecycleState::Deleting,
                ..removed
            };
            state.draining.insert(id.to_string(), (drain, draining));
        }
        Ok(())
    }

    fn build_update(&self, _current: &Widget, desired: &Desired) -> Desired {
        desired.clone()
    }

    fn matches(&self, desired: &Desired, observed: &Widget) -> bool {
        observed.name == desired.name
    }
}

fn config() -> ResilienceConfig {
    ResilienceConfig::builder()
        .fixed_backoff(Duration::from_millis(500))
        .update_deadline(Duration::from_secs(2))
        .verify_deadline(Duration::from_secs(5))
        .delete_deadline(Duration::from_secs(5))
        .read_deadline(Duration::from_secs(2))
        .build()
}

fn reconciler(remote: FakeRemote) -> EntityReconciler<FakeRemote> {
    let _ = env_logger::builder().is_test(true).try_init();
    EntityReconciler::new(remote, config(), ResourceCache::new())
}

fn ids(widgets: &[Widget]) -> Vec<String> {
    widgets.iter().map(|widget| widget.id.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_fetch_all_twice_returns_same_set() {
    let reconciler = reconciler(FakeRemote::seeded(5)).with_page_size(2);

    let first = reconciler.list().await.unwrap();
    let second = reconciler.list().await.unwrap();

    assert_eq!(first.len(), 5);
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(reconciler.remote().list_calls(), 6);
    assert_eq!(reconciler.cache().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_full_then_short_page_makes_two_calls() {
    let reconciler = reconciler(FakeRemote::seeded(150));

    let widgets = reconciler.list().await.unwrap();

    assert_eq!(widgets.len(), 150);
    assert_eq!(reconciler.remote().list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_three_pages_of_hundred() {
    let reconciler = reconciler(FakeRemote::seeded(237)).with_page_size(100);

    let widgets = reconciler.list().await.unwrap();

    assert_eq!(widgets.len(), 237);
    assert_eq!(reconciler.remote().list_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_listed_read_skips_lookup_unlisted_read_calls_once() {
    let reconciler = reconciler(FakeRemote::seeded(3));
    reconciler.list().await.unwrap();

    let listed = reconciler.read("w-002").await.unwrap();
    assert_eq!(listed.name, "widget 2");
    assert_eq!(reconciler.remote().lookups(), 0);

    reconciler.remote().insert(Widget::new("w-900", "late arrival"));
    let unlisted = reconciler.read("w-900").await.unwrap();
    assert_eq!(unlisted.name, "late arrival");
    assert_eq!(reconciler.remote().lookups(), 1);
    assert!(!reconciler.cache().contains("w-900"));

    let stats = reconciler.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_always_conflicting_update_is_exhausted() {
    let reconciler = reconciler(FakeRemote::seeded(1).always_conflicting());
    let start = Instant::now();

    let error = reconciler.update("w-001", &desired("renamed")).await.unwrap_err();
    let elapsed = start.elapsed();

    match error {
        ReconcileError::ConflictExhausted { ref id, attempts, .. } => {
            assert_eq!(id, "w-001");
            assert_eq!(attempts, 4);
        }
        ref other => panic!("expected conflict exhaustion, got {:?}", other),
    }
    assert!(error.kind().retry_later());
    assert_eq!(reconciler.remote().updates.load(Ordering::SeqCst), 4);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_update_retries_conflict_and_waits_for_visibility() {
    let reconciler = reconciler(FakeRemote::seeded(1).with_conflicts(1).with_stale_reads(1));

    let handle = reconciler.update("w-001", &desired("renamed")).await.unwrap();

    assert_eq!(handle.id, "w-001");
    assert_eq!(handle.version.as_deref(), Some("W/\"2\""));
    // two update-loop reads, one stale verification read, one confirming read
    assert_eq!(reconciler.remote().lookups(), 4);
    assert_eq!(reconciler.remote().updates.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_update_of_missing_resource_is_not_found() {
    let reconciler = reconciler(FakeRemote::seeded(1));

    let error = reconciler.update("w-404", &desired("anything")).await.unwrap_err();

    assert!(matches!(error, ReconcileError::NotFound { ref id } if id == "w-404"));
    assert_eq!(reconciler.remote().updates.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_update_never_visible_is_inconsistent() {
    let reconciler = reconciler(FakeRemote::seeded(1).with_stale_reads(u32::MAX));

    let error = reconciler.update("w-001", &desired("renamed")).await.unwrap_err();

    assert_eq!(error.kind(), OutcomeKind::Inconsistent);
    assert!(!error.kind().retry_later());
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_until_readable() {
    let reconciler = reconciler(FakeRemote::seeded(0).with_stale_reads(2));

    let handle = reconciler.create(&desired("fresh")).await.unwrap();

    assert_eq!(handle.id, "w-001");
    assert_eq!(reconciler.remote().creates.load(Ordering::SeqCst), 1);
    assert_eq!(reconciler.remote().lookups(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_create_is_retried() {
    let remote = FakeRemote::seeded(0).with_create_failures(vec![ApiError::from_status(429, "Too Many Requests")]);
    let reconciler = reconciler(remote);
    let start = Instant::now();

    let outcome = reconciler.apply(Operation::create(desired("fresh"))).await;

    assert!(outcome.is_converged(), "{:?}", outcome.result);
    assert_eq!(outcome.id.as_deref(), Some("w-001"));
    assert_eq!(reconciler.remote().creates(), 2);
    assert!(start.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_create_throttled_until_deadline_is_retried_later() {
    let throttled = (0..10).map(|_| ApiError::from_status(503, "Service Unavailable")).collect();
    let reconciler = reconciler(FakeRemote::seeded(0).with_create_failures(throttled));

    let report = reconciler.reconcile_all(vec![Operation::create(desired("fresh"))]).await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.kind(), OutcomeKind::TimedOut);
    assert!(outcome.retry_later());
    assert!(report.failed().is_empty());
    // 2s update deadline with a fixed 500ms backoff
    assert_eq!(reconciler.remote().creates(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_create_lost_in_transit_is_not_repeated() {
    let remote = FakeRemote::seeded(0).with_create_failures(vec![ApiError::Network("connection reset".to_string())]);
    let reconciler = reconciler(remote);

    let outcome = reconciler.apply(Operation::create(desired("fresh"))).await;

    assert_eq!(outcome.kind(), OutcomeKind::TimedOut);
    assert!(outcome.retry_later());
    assert_eq!(reconciler.remote().creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_create_is_failed() {
    let remote = FakeRemote::seeded(0).with_create_failures(vec![ApiError::from_status(400, "name is required")]);
    let reconciler = reconciler(remote);

    let outcome = reconciler.apply(Operation::create(desired(""))).await;

    assert_eq!(outcome.kind(), OutcomeKind::Failed);
    assert!(!outcome.retry_later());
    assert_eq!(reconciler.remote().creates(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_converges_on_first_not_found() {
    let reconciler = reconciler(FakeRemote::seeded(1));

    let handle = reconciler.delete("w-001").await.unwrap();

    assert_eq!(handle.state, LifecycleState::Deleted);
    assert_eq!(reconciler.remote().lookups(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_waits_for_draining() {
    let reconciler = reconciler(FakeRemote::seeded(1).with_delete_drain(2));

    reconciler.delete("w-001").await.unwrap();

    assert_eq!(reconciler.remote().lookups(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delete_of_absent_resource_succeeds() {
    let reconciler = reconciler(FakeRemote::seeded(0));

    let handle = reconciler.delete("w-777").await.unwrap();

    assert_eq!(handle.id, "w-777");
    assert_eq!(reconciler.remote().deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_after_delete_misses_cache() {
    let reconciler = reconciler(FakeRemote::seeded(2));
    reconciler.list().await.unwrap();
    assert!(reconciler.cache().contains("w-001"));

    reconciler.delete("w-001").await.unwrap();
    assert!(!reconciler.cache().contains("w-001"));

    let lookups_before = reconciler.remote().lookups();
    let error = reconciler.read("w-001").await.unwrap_err();

    assert!(error.is_not_found());
    assert_eq!(reconciler.remote().lookups(), lookups_before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_invalidates_listed_entry() {
    let reconciler = reconciler(FakeRemote::seeded(2));
    reconciler.list().await.unwrap();

    reconciler.update("w-002", &desired("renamed")).await.unwrap();
    assert!(!reconciler.cache().contains("w-002"));

    let fresh = reconciler.read("w-002").await.unwrap();
    assert_eq!(fresh.name, "renamed");
}

#[tokio::test(start_paused = true)]
async fn test_batch_reports_one_outcome_per_operation() {
    let reconciler = reconciler(FakeRemote::seeded(3));

    let report = reconciler
        .reconcile_all(vec![
            Operation::create(desired("new")),
            Operation::update("w-001", desired("renamed")),
            Operation::delete("w-002"),
            Operation::read("ghost"),
        ])
        .await;

    assert_eq!(report.len(), 4);
    assert_eq!(report.outcomes[0].id.as_deref(), Some("w-004"));
    assert_eq!(report.outcomes[3].kind(), OutcomeKind::NotFound);

    let summary = report.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.converged, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retry_later, 0);
    assert_eq!(summary.by_outcome.get("not_found"), Some(&1));
    assert!(report.retry_later_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_lists_conflicted_ids_for_retry() {
    let reconciler = reconciler(FakeRemote::seeded(2).always_conflicting());

    let report = reconciler
        .reconcile_all(vec![
            Operation::update("w-001", desired("renamed")),
            Operation::read("w-002"),
        ])
        .await;

    assert_eq!(report.retry_later_ids(), vec!["w-001"]);
    assert_eq!(report.outcomes[0].kind(), OutcomeKind::ConflictExhausted);
    assert!(report.outcomes[1].is_converged());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_reconciler_makes_no_calls() {
    let token = CancellationToken::new();
    let reconciler = reconciler(FakeRemote::seeded(1)).with_cancellation(token.clone());
    token.cancel();

    let outcome = reconciler.apply(Operation::update("w-001", desired("renamed"))).await;

    assert_eq!(outcome.kind(), OutcomeKind::Cancelled);
    assert!(outcome.retry_later());
    assert_eq!(reconciler.remote().lookups(), 0);
    assert_eq!(reconciler.remote().updates.load(Ordering::SeqCst), 0);
}
