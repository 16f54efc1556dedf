// src/core/key.rs

//! Maps request keys onto their on-disk shard path.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Computes the hex-encoded SHA-256 digest of `key`.
pub fn digest_hex(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the absolute path `<root>/<hh>/<digest>` for `key`, where `<hh>` is
/// the first two hex characters of its SHA-256 digest.
pub fn shard_path(root: &Path, key: &str) -> PathBuf {
    let digest = digest_hex(key);
    let shard = &digest[0..2];
    root.join(shard).join(digest)
}

/// Returns the shard directory (`<root>/<hh>`) that would hold `key`'s file.
pub fn shard_dir(root: &Path, key: &str) -> PathBuf {
    let digest = digest_hex(key);
    root.join(&digest[0..2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_64_hex_chars() {
        let d1 = digest_hex("/a.bin");
        let d2 = digest_hex("/a.bin");
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_keys_yield_distinct_paths() {
        let root = Path::new("/cache");
        let p1 = shard_path(root, "/a.bin");
        let p2 = shard_path(root, "/b.bin");
        assert_ne!(p1, p2);
    }

    #[test]
    fn shard_path_is_nested_under_shard_dir() {
        let root = Path::new("/cache");
        let key = "/some/path.txt";
        let path = shard_path(root, key);
        let dir = shard_dir(root, key);
        assert_eq!(path.parent().unwrap(), dir);
    }
}
