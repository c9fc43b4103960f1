//! Listing-backed resource cache
//!
//! One cache instance per entity type, constructed by the caller and handed
//! to the engine. Entries only come from full listings; point lookups that
//! miss go to the remote and leave the cache untouched.

use super::resource::Entity;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// When cached listing entries are dropped
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Also invalidate after a successful update, not only after delete
    pub invalidate_on_update: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            invalidate_on_update: true,
        }
    }
}

/// One cached snapshot
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub id: String,
    pub entity: T,
    /// Monotonic insertion counter, later listings get larger markers
    pub marker: u64,
}

/// Cloneable handle to a shared, concurrently accessed cache
#[derive(Debug, Clone)]
pub struct ResourceCache<T> {
    inner: Arc<Mutex<CacheInner<T>>>,
}

#[derive(Debug)]
struct CacheInner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    next_marker: u64,
    hits: u64,
    misses: u64,
}

impl<T: Entity> ResourceCache<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_marker: 0,
                hits: 0,
                misses: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached snapshot for `id`, or `None` on a miss
    pub fn get(&self, id: &str) -> Option<T> {
        let mut inner = self.lock();
        let entity = inner.entries.get(id).map(|entry| entry.entity.clone());
        match entity {
            Some(_) => inner.hits += 1,
            None => inner.misses += 1,
        }
        entity
    }

    /// Full entry including its insertion marker
    pub fn entry(&self, id: &str) -> Option<CacheEntry<T>> {
        self.lock().entries.get(id).cloned()
    }

    /// Store a listed entity, replacing any earlier entry for the same id.
    /// Only listing call sites may populate the cache.
    pub(crate) fn set(&self, entity: &T) {
        let mut inner = self.lock();
        inner.next_marker += 1;
        let marker = inner.next_marker;
        let id = entity.id().to_string();
        inner.entries.insert(
            id.clone(),
            CacheEntry {
                id,
                entity: entity.clone(),
                marker,
            },
        );
    }

    /// Drop the entry for `id`; true if one was present
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.lock().entries.remove(id).is_some();
        if removed {
            debug!("Cache: invalidated '{}'", id);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}

impl<T: Entity> Default for ResourceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Record {
        id: String,
        name: String,
    }

    impl Entity for Record {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn record(id: &str, name: &str) -> Record {
        Record {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_get_set_invalidate() {
        let cache = ResourceCache::new();
        assert!(cache.get("a").is_none());

        cache.set(&record("a", "first"));
        assert_eq!(cache.get("a"), Some(record("a", "first")));
        assert!(cache.contains("a"));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_relisting_is_last_write_wins() {
        let cache = ResourceCache::new();
        cache.set(&record("a", "old"));
        let first = cache.entry("a").unwrap().marker;

        cache.set(&record("a", "new"));
        let entry = cache.entry("a").unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(entry.entity.name, "new");
        assert!(entry.marker > first);
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = ResourceCache::new();
        cache.set(&record("a", "x"));

        cache.get("a");
        cache.get("a");
        cache.get("b");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = ResourceCache::new();
        let handle = cache.clone();

        handle.set(&record("shared", "v"));
        assert!(cache.contains("shared"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access() {
        let cache = ResourceCache::new();

        let tasks: Vec<_> = (0..8)
            .map(|worker| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for i in 0..100 {
                        let id = format!("{}-{}", worker, i);
                        cache.set(&record(&id, "x"));
                        assert!(cache.get(&id).is_some());
                        if i % 2 == 0 {
                            cache.invalidate(&id);
                        }
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(cache.len(), 8 * 50);
    }
}
