// src/core/cache/index.rs

//! Durable, atomic persistence of the completed-entry set.

use crate::core::cache::entry::CacheEntry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

const INDEX_FILE: &str = "index.json";
const INDEX_TMP_FILE: &str = "index.json.tmp";

#[derive(Debug, Serialize, Deserialize, Default)]
struct IndexSnapshot {
    entries: Vec<CacheEntry>,
}

/// Serializes `entries` to `<root>/index.json.tmp` then renames it over
/// `<root>/index.json`, matching the project's staged-write-then-rename
/// durability pattern for its own snapshot persistence.
pub async fn save(root: &Path, entries: Vec<CacheEntry>) -> Result<()> {
    let snapshot = IndexSnapshot { entries };
    let json = serde_json::to_vec_pretty(&snapshot).context("failed to serialize cache index")?;

    let tmp_path = root.join(INDEX_TMP_FILE);
    let final_path = root.join(INDEX_FILE);

    tokio::fs::write(&tmp_path, &json)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, &final_path)
        .await
        .with_context(|| format!("failed to rename index into place at {}", final_path.display()))?;
    Ok(())
}

/// Loads `<root>/index.json` if present. For each entry, `stat`s the backing
/// file; entries whose file is missing or whose size differs are dropped and
/// their (possibly stale) file unlinked. Returns only valid entries.
pub async fn load(root: &Path) -> Vec<CacheEntry> {
    let path = root.join(INDEX_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to read cache index, starting empty");
            return Vec::new();
        }
    };

    let snapshot: IndexSnapshot = match serde_json::from_slice(&bytes) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to parse cache index, starting empty");
            return Vec::new();
        }
    };

    let mut valid = Vec::with_capacity(snapshot.entries.len());
    for entry in snapshot.entries {
        match tokio::fs::metadata(&entry.file_path).await {
            Ok(meta) if meta.len() == entry.size => valid.push(entry),
            Ok(_) => {
                warn!(key = %entry.key, "index entry size mismatch, dropping and unlinking");
                tokio::fs::remove_file(&entry.file_path).await.ok();
            }
            Err(_) => {
                warn!(key = %entry.key, "index entry file missing, dropping");
            }
        }
    }
    valid
}

/// Walks the cache root and removes any regular file not referenced by
/// `valid_paths` and not one of the index files themselves. Best-effort:
/// individual failures are logged and skipped.
pub async fn cleanup_orphans(root: &Path, valid_paths: &std::collections::HashSet<std::path::PathBuf>) {
    let mut shard_dirs = match tokio::fs::read_dir(root).await {
        Ok(rd) => rd,
        Err(e) => {
            warn!(error = %e, "failed to read cache root for orphan cleanup");
            return;
        }
    };

    while let Ok(Some(shard_entry)) = shard_dirs.next_entry().await {
        let shard_path = shard_entry.path();
        if !shard_path.is_dir() {
            continue;
        }
        let mut files = match tokio::fs::read_dir(&shard_path).await {
            Ok(rd) => rd,
            Err(e) => {
                warn!(error = %e, dir = %shard_path.display(), "failed to read shard directory");
                continue;
            }
        };

        let mut any_left = false;
        while let Ok(Some(file_entry)) = files.next_entry().await {
            let file_path = file_entry.path();
            if !file_path.is_file() {
                any_left = true;
                continue;
            }
            if valid_paths.contains(&file_path) {
                any_left = true;
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&file_path).await {
                warn!(error = %e, path = %file_path.display(), "failed to unlink orphan cache file");
                any_left = true;
            }
        }

        if !any_left {
            tokio::fs::remove_dir(&shard_path).await.ok();
        }
    }
}
