// src/core/cache/store.rs

//! Keyed store over completed cache entries (LRU + sliding TTL + size bound)
//! and the concurrent map of in-progress `StreamingFile`s, mirroring the
//! project's existing `fetch_locks: DashMap<Bytes, Arc<Mutex<()>>>` single-flight
//! idiom for the pending side.

use crate::core::cache::entry::{CacheEntry, CacheStats};
use crate::core::cache::index;
use crate::core::errors::ProxyError;
use crate::core::key;
use crate::core::metrics;
use crate::core::negative_cache::NegativeCache;
use crate::core::streaming_file::StreamingFile;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use lru::LruCache;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

struct CompletedEntry {
    entry: CacheEntry,
    inserted_at: Instant,
}

/// Resolves a key to {completed entry | pending streaming file | miss};
/// creates, promotes, and fails pending entries; enforces size and TTL
/// bounds; persists and reloads the on-disk index.
pub struct CacheStore {
    root: PathBuf,
    completed: Mutex<LruCache<String, CompletedEntry>>,
    pending: DashMap<String, Arc<StreamingFile>>,
    negative: NegativeCache,
    total_size: AtomicU64,
    max_size: u64,
    ttl: Duration,
}

impl CacheStore {
    pub fn new(
        root: PathBuf,
        max_size: u64,
        ttl: Duration,
        negative_cache_capacity: usize,
        negative_cache_ttl: Duration,
    ) -> Self {
        Self {
            root,
            completed: Mutex::new(LruCache::unbounded()),
            pending: DashMap::new(),
            negative: NegativeCache::new(negative_cache_capacity, negative_cache_ttl),
            total_size: AtomicU64::new(0),
            max_size,
            ttl,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Loads the persisted index, drops entries whose backing file is missing
    /// or size-mismatched, then sweeps the cache root for orphan files.
    pub async fn load_from_disk(&self) {
        let valid = index::load(&self.root).await;
        let mut total = 0u64;
        let mut valid_paths = std::collections::HashSet::with_capacity(valid.len());
        {
            let mut guard = self.completed.lock();
            for entry in valid {
                total += entry.size;
                valid_paths.insert(entry.file_path.clone());
                guard.put(
                    entry.key.clone(),
                    CompletedEntry {
                        entry,
                        inserted_at: Instant::now(),
                    },
                );
            }
        }
        self.total_size.store(total, Ordering::Relaxed);
        info!(entries = valid_paths.len(), total_size = total, "loaded cache index");
        index::cleanup_orphans(&self.root, &valid_paths).await;
    }

    /// Serializes the current completed-entry set and atomically replaces
    /// `index.json`. Failures are logged, never fatal.
    pub async fn save_to_disk(&self) {
        let entries: Vec<CacheEntry> = {
            let guard = self.completed.lock();
            guard.iter().map(|(_, c)| c.entry.clone()).collect()
        };
        if let Err(e) = index::save(&self.root, entries).await {
            warn!(error = %e, "failed to save cache index");
        }
    }

    /// Returns a completed entry if present and not TTL-expired, refreshing
    /// its sliding deadline. Does not validate the backing file against disk;
    /// callers are responsible for `stat`-validating on the HIT path.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut guard = self.completed.lock();
        let expired = match guard.peek(key) {
            Some(c) => c.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            let evicted = guard.pop(key);
            drop(guard);
            if let Some(c) = evicted {
                self.total_size.fetch_sub(c.entry.size, Ordering::Relaxed);
                self.unlink_later(c.entry.file_path);
            }
            return None;
        }
        let c = guard.get_mut(key)?;
        c.inserted_at = Instant::now();
        Some(c.entry.clone())
    }

    pub fn get_pending(&self, key: &str) -> Option<Arc<StreamingFile>> {
        self.pending.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Atomically returns the existing pending `StreamingFile` for `key`, or
    /// creates and inserts a new one. Uses `DashMap::entry()` for a single
    /// write-shard-locked check-and-insert, the same primitive the project
    /// already relies on for single-flight upstream fetches.
    pub async fn get_or_create_pending(
        &self,
        key: &str,
    ) -> Result<(Arc<StreamingFile>, bool), ProxyError> {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(occ) => Ok((Arc::clone(occ.get()), false)),
            Entry::Vacant(vac) => {
                let path = key::shard_path(&self.root, key);
                let sf = StreamingFile::create(path).await?;
                vac.insert(Arc::clone(&sf));
                Ok((sf, true))
            }
        }
    }

    /// Promotes a pending entry to completed: marks the `StreamingFile` done,
    /// evicts LRU victims to satisfy the size bound, and records the new entry.
    pub async fn complete_pending(&self, key: &str, size: u64, content_type: String) {
        let Some((_, sf)) = self.pending.remove(key) else {
            return;
        };
        sf.complete().await;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let new_entry = CacheEntry {
            key: key.to_string(),
            file_path: sf.path().to_path_buf(),
            size,
            content_type,
            created_at,
        };

        let evicted = {
            let mut guard = self.completed.lock();
            let mut victims = Vec::new();
            while self.total_size.load(Ordering::Relaxed) + size > self.max_size {
                match guard.pop_lru() {
                    Some((_, c)) => {
                        self.total_size.fetch_sub(c.entry.size, Ordering::Relaxed);
                        victims.push(c.entry.file_path);
                    }
                    None => break,
                }
            }
            guard.put(
                key.to_string(),
                CompletedEntry {
                    entry: new_entry,
                    inserted_at: Instant::now(),
                },
            );
            victims
        };
        self.total_size.fetch_add(size, Ordering::Relaxed);
        metrics::CACHE_ENTRIES.set(self.completed.lock().len() as f64);
        metrics::CACHE_SIZE_BYTES.set(self.total_size.load(Ordering::Relaxed) as f64);
        for path in evicted {
            metrics::CACHE_EVICTIONS_TOTAL.inc();
            self.unlink_later(path);
        }
    }

    /// Removes a pending entry and aborts its `StreamingFile`, unlinking the
    /// partial file. No-op if `key` is not pending.
    pub async fn fail_pending(&self, key: &str) {
        if let Some((_, sf)) = self.pending.remove(key) {
            sf.abort().await;
        }
    }

    /// Aborts every still in-flight pending `StreamingFile`, unlinking each
    /// partial file and waking its tailing readers with an error. Used when
    /// closing the store down, since no pending fetch can ever complete
    /// past that point.
    pub async fn abort_all_pending(&self) {
        let keys: Vec<String> = self.pending.iter().map(|r| r.key().clone()).collect();
        for key in keys {
            self.fail_pending(&key).await;
        }
    }

    /// Closes the store: aborts all remaining pending fetches, then writes
    /// a final index snapshot. Called once, during graceful shutdown.
    pub async fn shutdown(&self) {
        self.abort_all_pending().await;
        self.save_to_disk().await;
    }

    pub fn put_not_found(&self, key: &str) {
        self.negative.insert(key);
    }

    pub fn is_not_found(&self, key: &str) -> bool {
        self.negative.contains(key)
    }

    /// Removes `key` from both the completed and negative caches. Does not
    /// touch the pending map. Unlinks the backing file if one was present.
    pub fn remove(&self, key: &str) {
        self.negative.remove(key);
        let evicted = self.completed.lock().pop(key);
        if let Some(c) = evicted {
            self.total_size.fetch_sub(c.entry.size, Ordering::Relaxed);
            self.unlink_later(c.entry.file_path);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let file_entries = self.completed.lock().len();
        let total_size = self.total_size.load(Ordering::Relaxed);
        let usage_percent = if self.max_size == 0 {
            0.0
        } else {
            (total_size as f64 / self.max_size as f64) * 100.0
        };
        CacheStats {
            file_entries,
            notfound_entries: self.negative.len(),
            total_size,
            max_size: self.max_size,
            usage_percent,
            pending: self.pending.len(),
        }
    }

    /// Fires an async unlink for an evicted file without holding the
    /// completed-entry lock across the filesystem call. Idempotent against
    /// files that are already gone.
    fn unlink_later(&self, path: PathBuf) {
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %e, path = %path.display(), "failed to unlink evicted cache file");
                }
            }
        });
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(
            PathBuf::from("cache_data"),
            1024 * 1024 * 1024,
            Duration::from_secs(3600),
            10_000,
            Duration::from_secs(60),
        )
    }
}
