//! Collaborator contract for one remote entity type

use super::resource::{Entity, Page};
use crate::api::ApiError;
use async_trait::async_trait;

/// Point lookup, listing and mutations for one entity type.
///
/// Implementations translate between request documents and the remote API;
/// retries, version conflicts and read-after-write checks are the engine's
/// job, so every method makes exactly one remote call.
#[async_trait]
pub trait RemoteResource: Send + Sync {
    type Entity: Entity;
    /// Desired-state document for create and update
    type Request: Send + Sync;

    /// Entity type name used in logs
    fn kind(&self) -> &str;

    /// Fetch one resource, `ApiError::NotFound` if absent
    async fn lookup(&self, id: &str) -> Result<Self::Entity, ApiError>;

    /// Fetch one listing page (1-based). Pages are requested in order,
    /// starting again from page 1 for every listing.
    async fn list_page(&self, page: u32, page_size: u32) -> Result<Page<Self::Entity>, ApiError>;

    async fn create(&self, request: &Self::Request) -> Result<Self::Entity, ApiError>;

    /// Apply `request` on top of `current`, echoing its version token
    async fn update(&self, current: &Self::Entity, request: &Self::Request) -> Result<Self::Entity, ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    /// Rebuild the update request against a freshly read resource
    fn build_update(&self, current: &Self::Entity, desired: &Self::Request) -> Self::Request;

    /// True if `error` is this API's optimistic-concurrency rejection
    fn is_conflict(&self, error: &ApiError) -> bool {
        error.is_version_conflict()
    }

    /// Whether `observed` reflects `desired`; used when the version alone
    /// cannot prove a write is visible
    fn matches(&self, _desired: &Self::Request, _observed: &Self::Entity) -> bool {
        true
    }
}
