//! Reconciliation operations dispatched through an `EntityReconciler`

use serde::{Deserialize, Serialize};

/// A single desired-state change against one entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation<Req> {
    /// Create a resource and wait until it is readable
    Create {
        /// Desired-state document
        desired: Req,
    },
    /// Read one resource, from the cache when it was listed
    Read { id: String },
    /// Update a resource under optimistic concurrency
    Update {
        /// Resource ID
        id: String,
        /// Desired-state document, rebuilt against every fresh read
        desired: Req,
    },
    /// Delete a resource and wait until it is gone
    Delete { id: String },
}

impl<Req> Operation<Req> {
    pub fn create(desired: Req) -> Self {
        Self::Create { desired }
    }

    pub fn read(id: impl Into<String>) -> Self {
        Self::Read { id: id.into() }
    }

    pub fn update(id: impl Into<String>, desired: Req) -> Self {
        Self::Update { id: id.into(), desired }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::Delete { id: id.into() }
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Read { .. } => "read",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Target resource ID, `None` for creates
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Create { .. } => None,
            Self::Read { id } | Self::Update { id, .. } | Self::Delete { id } => Some(id),
        }
    }

    /// Whether this operation changes remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Read { .. })
    }
}
