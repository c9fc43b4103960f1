//! State reconciliation against an eventually consistent remote API
//!
//! Drives remote resources toward a desired state and only reports success
//! once a read confirms it:
//! - bounded retries with backoff (`api::resilience::RetryPolicy`)
//! - optimistic-concurrency updates that re-read on every conflict
//! - read-after-write verification for create, update and delete
//! - paged listings feeding a shared per-entity cache

pub mod cache;
pub mod engine;
pub mod error;
pub mod operation;
pub mod outcome;
pub mod paging;
pub mod remote;
pub mod resource;
pub mod update;
pub mod verify;

pub use cache::{CacheEntry, CachePolicy, CacheStats, ResourceCache};
pub use engine::{DEFAULT_PAGE_SIZE, EntityReconciler, ReconcileEngine};
pub use error::{OutcomeKind, ReconcileError};
pub use operation::Operation;
pub use outcome::{BatchReport, BatchSummary, ReconciliationOutcome};
pub use paging::PagedFetcher;
pub use remote::RemoteResource;
pub use resource::{Entity, LifecycleState, Page, ResourceHandle};
pub use update::{OptimisticUpdateLoop, UpdateOutcome};
pub use verify::{ConsistencyVerifier, WriteVisibility, write_visibility};
