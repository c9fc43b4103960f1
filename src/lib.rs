//! Reconcile declared state against the Dynamics 365 Web API
//!
//! The `reconcile` module holds the engine: bounded retries, optimistic
//! concurrency, read-after-write verification and listing-backed caching.
//! The `api` module provides the HTTP adapter and resilience settings;
//! `config` loads them from TOML and the environment.

pub mod api;
pub mod config;
pub mod reconcile;

pub use api::{ApiError, DynamicsClient, EntitySet, Record, ResilienceConfig};
pub use config::Config;
pub use reconcile::{
    EntityReconciler, Operation, OutcomeKind, ReconcileEngine, ReconcileError, RemoteResource, ResourceCache,
};
