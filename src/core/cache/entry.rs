// src/core/cache/entry.rs

//! The completed-entry type and the stats snapshot served from `/stats`.

use serde::{Deserialize, Serialize};

/// A fully-downloaded, on-disk cached object and its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub file_path: std::path::PathBuf,
    pub size: u64,
    pub content_type: String,
    pub created_at: u64,
}

/// Point-in-time snapshot of cache occupancy, returned from `/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub file_entries: usize,
    pub notfound_entries: usize,
    pub total_size: u64,
    pub max_size: u64,
    pub usage_percent: f64,
    pub pending: usize,
}
