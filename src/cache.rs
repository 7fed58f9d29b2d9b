// src/cache.rs - Fixed-capacity cache with insertion-order eviction

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Thread-safe fixed-capacity map that evicts the oldest insertion when
/// a put exceeds capacity.
///
/// Backed by `LruCache`, but reads use `peek` so recency is never
/// updated: the internal order stays the insertion order, which makes
/// eviction strictly oldest-first. Re-inserting an existing key counts
/// as a fresh insertion.
#[derive(Debug)]
pub struct FragmentCache<K: Hash + Eq, V> {
    cache: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> FragmentCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity must be > 0"),
            )),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let cache = self.cache.lock().unwrap();
        cache.peek(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        let mut cache = self.cache.lock().unwrap();
        cache.put(key, value);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}
