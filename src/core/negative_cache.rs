// src/core/negative_cache.rs

//! A small, TTL-bounded LRU set of keys known to be absent upstream.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Bounded set of "known 404" keys with a sliding per-entry TTL.
pub struct NegativeCache {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl NegativeCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Records `key` as known-absent, refreshing its deadline if already present.
    pub fn insert(&self, key: &str) {
        self.entries.lock().put(key.to_string(), Instant::now());
    }

    /// Returns `true` if `key` is known-absent and not yet expired. A hit
    /// refreshes the entry's sliding deadline and its LRU recency.
    pub fn contains(&self, key: &str) -> bool {
        let mut guard = self.entries.lock();
        match guard.get(key).copied() {
            Some(inserted_at) if inserted_at.elapsed() < self.ttl => {
                guard.put(key.to_string(), Instant::now());
                true
            }
            Some(_) => {
                guard.pop(key);
                false
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().pop(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
