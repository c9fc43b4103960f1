//! Resource handles and pages as seen by the reconciliation engine

use serde::{Deserialize, Serialize};

/// Lifecycle of a remote resource as reported by the remote system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Active,
    Deleting,
    /// Deleted or absent
    Deleted,
    /// Only observed during transient read failures
    Unknown,
}

impl LifecycleState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, LifecycleState::Deleted)
    }

    /// Parse a lifecycle value reported by the remote system
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "active" | "enabled" | "available" | "ready" => LifecycleState::Active,
            "deleting" | "pending_delete" | "pendingdelete" | "draining" => LifecycleState::Deleting,
            "deleted" | "absent" | "removed" => LifecycleState::Deleted,
            _ => LifecycleState::Unknown,
        }
    }
}

/// Anything the engine can cache, look up and version-check.
///
/// Implemented by collaborator entity types; the engine never looks past
/// these three accessors.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Remote-assigned identifier
    fn id(&self) -> &str;

    /// Opaque concurrency token, `None` if the resource is not versioned
    fn version(&self) -> Option<&str> {
        None
    }

    fn lifecycle(&self) -> LifecycleState {
        LifecycleState::Active
    }

    fn handle(&self) -> ResourceHandle {
        ResourceHandle {
            id: self.id().to_string(),
            version: self.version().map(str::to_string),
            state: self.lifecycle(),
        }
    }
}

/// Snapshot of a resource's identity, version and lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: String,
    pub version: Option<String>,
    pub state: LifecycleState,
}

impl ResourceHandle {
    /// Handle reported for a resource confirmed absent
    pub fn deleted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            state: LifecycleState::Deleted,
        }
    }
}

/// One page of a listing endpoint
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Explicit end-of-pages signal from the remote
    pub has_more: bool,
    /// Server-issued continuation for the following page, if any
    pub next_link: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, has_more: bool) -> Self {
        Self {
            items,
            has_more,
            next_link: None,
        }
    }

    /// Page continued by `next_link`
    pub fn continued(items: Vec<T>, next_link: impl Into<String>) -> Self {
        Self {
            items,
            has_more: true,
            next_link: Some(next_link.into()),
        }
    }

    /// Final page of a listing
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, false)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Widget {
        id: String,
        etag: Option<String>,
    }

    impl Entity for Widget {
        fn id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> Option<&str> {
            self.etag.as_deref()
        }
    }

    #[test]
    fn test_lifecycle_parsing() {
        assert_eq!(LifecycleState::parse("Active"), LifecycleState::Active);
        assert_eq!(LifecycleState::parse(" deleting "), LifecycleState::Deleting);
        assert_eq!(LifecycleState::parse("DELETED"), LifecycleState::Deleted);
        assert_eq!(LifecycleState::parse("frobnicated"), LifecycleState::Unknown);
        assert!(LifecycleState::Deleted.is_deleted());
        assert!(!LifecycleState::Deleting.is_deleted());
    }

    #[test]
    fn test_default_handle() {
        let widget = Widget {
            id: "w-1".to_string(),
            etag: Some("W/\"42\"".to_string()),
        };

        let handle = widget.handle();
        assert_eq!(handle.id, "w-1");
        assert_eq!(handle.version.as_deref(), Some("W/\"42\""));
        assert_eq!(handle.state, LifecycleState::Active);
    }

    #[test]
    fn test_page_helpers() {
        let page = Page::new(vec![1, 2, 3], true);
        assert_eq!(page.len(), 3);
        assert!(page.has_more);

        let last: Page<u8> = Page::last(Vec::new());
        assert!(last.is_empty());
        assert!(!last.has_more);
        assert!(last.next_link.is_none());

        let continued = Page::continued(vec![4], "https://org/api/data/v9.2/widgets?$skiptoken=1");
        assert!(continued.has_more);
        assert_eq!(continued.next_link.as_deref(), Some("https://org/api/data/v9.2/widgets?$skiptoken=1"));
    }
}
