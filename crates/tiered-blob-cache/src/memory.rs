//! In-memory tier with cost-weighted LRU eviction.

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Entry in the memory tier.
struct MemoryEntry<R> {
    resource: Arc<R>,
    /// Estimated size in bytes
    cost: usize,
}

struct Inner<R> {
    /// Recency order lives in the LRU list; front is most recently used.
    entries: LruCache<String, MemoryEntry<R>>,
    total_cost: usize,
}

/// Bounded map from cache key to decoded resource.
///
/// Every operation takes the single internal lock and never performs I/O, so
/// it is safe to call from any thread, including async tasks.
pub struct MemoryStore<R> {
    inner: Mutex<Inner<R>>,
    /// Maximum total cost in bytes
    capacity: usize,
}

impl<R> MemoryStore<R> {
    /// Create a store holding at most `capacity` bytes of estimated cost.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            capacity,
        }
    }

    /// Insert or replace the resource for `key`.
    ///
    /// Evicts least recently used entries until the total cost fits the
    /// capacity. A resource costing more than the whole capacity is not kept.
    pub fn put(&self, key: &str, resource: Arc<R>, cost: usize) {
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.pop(key) {
            inner.total_cost -= old.cost;
        }

        if cost > self.capacity {
            debug!(key, cost, capacity = self.capacity, "Resource exceeds memory capacity");
            return;
        }

        inner
            .entries
            .put(key.to_string(), MemoryEntry { resource, cost });
        inner.total_cost += cost;

        let mut evicted = 0usize;
        while inner.total_cost > self.capacity {
            match inner.entries.pop_lru() {
                Some((_, entry)) => {
                    inner.total_cost -= entry.cost;
                    evicted += 1;
                }
                None => break,
            }
        }

        if evicted > 0 {
            debug!(
                evicted,
                total_cost = inner.total_cost,
                "Evicted least recently used memory entries"
            );
        }
    }

    /// Get the resource for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        let mut inner = self.inner.lock();
        inner.entries.get(key).map(|entry| Arc::clone(&entry.resource))
    }

    /// Check for `key` without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<R>> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.pop(key)?;
        inner.total_cost -= entry.cost;
        Some(entry.resource)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_cost = 0;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the costs of all resident entries.
    pub fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn resource(s: &str) -> Arc<Vec<u8>> {
        Arc::new(s.as_bytes().to_vec())
    }

    #[test]
    fn test_put_and_get() {
        let store = MemoryStore::new(1024);
        store.put("a", resource("alpha"), 5);

        let got = store.get("a").unwrap();
        assert_eq!(got.as_slice(), b"alpha");
        assert_eq!(store.total_cost(), 5);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store: MemoryStore<Vec<u8>> = MemoryStore::new(1024);
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_updates_cost() {
        let store = MemoryStore::new(1024);
        store.put("a", resource("alpha"), 5);
        store.put("a", resource("alphabet"), 8);

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_cost(), 8);
        assert_eq!(store.get("a").unwrap().as_slice(), b"alphabet");
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let store = MemoryStore::new(30);
        store.put("a", resource("a"), 10);
        store.put("b", resource("b"), 10);
        store.put("c", resource("c"), 10);

        // Touch "a" so "b" becomes the oldest
        assert!(store.get("a").is_some());

        store.put("d", resource("d"), 10);

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
        assert!(store.contains("d"));
        assert_eq!(store.total_cost(), 30);
    }

    #[test]
    fn test_eviction_follows_insertion_order_without_access() {
        let store = MemoryStore::new(20);
        store.put("first", resource("1"), 10);
        store.put("second", resource("2"), 10);
        store.put("third", resource("3"), 15);

        // 10 + 10 + 15 > 20: both older entries must go
        assert!(!store.contains("first"));
        assert!(!store.contains("second"));
        assert!(store.contains("third"));
        assert_eq!(store.total_cost(), 15);
    }

    #[test]
    fn test_oversized_entry_is_not_kept() {
        let store = MemoryStore::new(10);
        store.put("small", resource("s"), 5);
        store.put("huge", resource("h"), 11);

        assert!(store.get("huge").is_none());
        assert!(store.contains("small"));
        assert_eq!(store.total_cost(), 5);
    }

    #[test]
    fn test_oversized_replacement_drops_stale_entry() {
        let store = MemoryStore::new(10);
        store.put("k", resource("old"), 3);
        store.put("k", resource("new"), 50);

        assert!(store.get("k").is_none());
        assert_eq!(store.total_cost(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = MemoryStore::new(100);
        store.put("a", resource("a"), 10);
        store.put("b", resource("b"), 20);

        assert!(store.remove("a").is_some());
        assert!(store.remove("a").is_none());
        assert_eq!(store.total_cost(), 20);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_cost(), 0);
    }

    #[test]
    fn test_concurrent_puts_keep_cost_accounting() {
        let store = Arc::new(MemoryStore::new(5_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("t{}-{}", t, i);
                        store.put(&key, Arc::new(vec![0u8; 1]), 1 + (i % 7));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let inner = store.inner.lock();
        let sum: usize = inner.entries.iter().map(|(_, e)| e.cost).sum();
        assert_eq!(inner.total_cost, sum);
        assert!(inner.total_cost <= 5_000);
    }
}
