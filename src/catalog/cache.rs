//! # Object Cache
//!
//! A bounded LRU map from entity id to a shared object handle, used to
//! avoid re-materializing tables and constraint definitions from their
//! registry rows. The cache never owns an object exclusively: handles are
//! `Arc`s shared with callers, and an evicted object stays alive for as
//! long as any caller still holds it.
//!
//! Recency is tracked with a monotonic tick. `get` refreshes the entry's
//! tick; `emplace` inserts and, when the cache is over capacity, evicts the
//! entry with the smallest tick. A linear scan picks the victim — catalog
//! caches hold tens to a few thousand entries, far below the point where a
//! linked-list LRU would pay for itself.

use hashbrown::HashMap;
use std::hash::Hash;
use std::sync::Arc;

#[derive(Debug)]
struct CacheEntry<V> {
    handle: Arc<V>,
    last_used: u64,
}

#[derive(Debug)]
pub struct ObjectCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    capacity: usize,
    tick: u64,
}

impl<K: Copy + Eq + Hash, V> ObjectCache<K, V> {
    /// Creates a cache holding at most `capacity` handles; a zero capacity
    /// is clamped to one so `emplace` always retains its own argument.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            tick: 0,
        }
    }

    /// Shared handle for `key`, refreshing its recency; `None` on a miss.
    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            Arc::clone(&entry.handle)
        })
    }

    /// Inserts (or refreshes) a handle, evicting the least-recently-used
    /// entry if the cache would exceed its capacity.
    pub fn emplace(&mut self, key: K, handle: Arc<V>) {
        self.tick += 1;
        let tick = self.tick;
        self.entries.insert(
            key,
            CacheEntry {
                handle,
                last_used: tick,
            },
        );
        if self.entries.len() > self.capacity {
            if let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(&key, _)| key)
            {
                self.entries.remove(&victim);
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|entry| entry.handle)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_hit_and_miss() {
        let mut cache: ObjectCache<u64, String> = ObjectCache::new(4);
        cache.emplace(1, Arc::new("one".to_string()));
        assert_eq!(cache.get(&1).unwrap().as_str(), "one");
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn test_eviction_removes_least_recently_used() {
        let mut cache: ObjectCache<u64, u64> = ObjectCache::new(2);
        cache.emplace(1, Arc::new(1));
        cache.emplace(2, Arc::new(2));
        // Touch 1 so 2 becomes the LRU victim.
        cache.get(&1);
        cache.emplace(3, Arc::new(3));
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_refreshes_instead_of_growing() {
        let mut cache: ObjectCache<u64, u64> = ObjectCache::new(2);
        cache.emplace(1, Arc::new(1));
        cache.emplace(1, Arc::new(10));
        assert_eq!(cache.len(), 1);
        assert_eq!(*cache.get(&1).unwrap(), 10);
    }

    #[test]
    fn test_evicted_handle_survives_while_shared() {
        let mut cache: ObjectCache<u64, u64> = ObjectCache::new(1);
        let held = Arc::new(1u64);
        cache.emplace(1, Arc::clone(&held));
        cache.emplace(2, Arc::new(2));
        assert!(!cache.contains(&1));
        assert_eq!(*held, 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache: ObjectCache<u64, u64> = ObjectCache::new(0);
        cache.emplace(1, Arc::new(1));
        assert_eq!(cache.capacity(), 1);
        assert!(cache.contains(&1));
    }
}
