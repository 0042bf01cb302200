//! Content-addressed cache (§4.D).
//!
//! Keys are deterministic SHA-256 digests over canonical JSON; values are
//! stored as `<key>.json` files, written atomically via a temp-file-then-
//! rename so concurrent writers to the same key never observe a torn file.
//! An optional byte budget evicts the least-recently-written entries after
//! every write.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use plexus_types::{canonical_sha256_hex, EngineError};
use serde_json::Value;

/// The literal string recorded in per-node metrics when a side-effecting
/// tool's result bypasses the cache entirely (§4.D).
pub const BYPASSED_SIDE_EFFECT: &str = "bypassed:side_effect";

/// Deterministic cache key: `SHA256(canonical_json({tool, version, inputs,
/// manifest_hash}))`.
pub fn cache_key(tool: &str, version: &str, inputs: &Value, manifest_hash: &str) -> String {
    canonical_sha256_hex(&serde_json::json!({
        "tool": tool,
        "version": version,
        "inputs": inputs,
        "manifest_hash": manifest_hash,
    }))
}

/// A content-addressed cache rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
    max_bytes: Option<u64>,
}

impl Cache {
    /// Open (creating if needed) a cache rooted at `root`. `max_bytes`, when
    /// set, bounds total on-disk size; after every write, the
    /// least-recently-written entries are deleted until the total fits.
    pub fn open(root: impl AsRef<Path>, max_bytes: Option<u64>) -> Result<Self, EngineError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .map_err(|e| EngineError::Engine(format!("cannot create cache dir {}: {e}", root.display())))?;
        Ok(Cache { root, max_bytes })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Read the stored value for `key`, if present.
    pub fn read(&self, key: &str) -> Result<Option<Value>, EngineError> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(text) => {
                let value = serde_json::from_str(&text)
                    .map_err(|e| EngineError::Engine(format!("corrupt cache entry {key}: {e}")))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Engine(format!("cannot read cache entry {key}: {e}"))),
        }
    }

    /// Write `value` under `key`, atomically. Triggers eviction afterwards
    /// if a byte budget is configured.
    pub fn write(&self, key: &str, value: &Value) -> Result<(), EngineError> {
        let path = self.entry_path(key);
        let tmp_path = self.root.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));

        let body = serde_json::to_string(value)
            .map_err(|e| EngineError::Engine(format!("cannot serialize cache entry {key}: {e}")))?;
        fs::write(&tmp_path, body)
            .map_err(|e| EngineError::Engine(format!("cannot write cache tmp file for {key}: {e}")))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| EngineError::Engine(format!("cannot rename cache tmp file for {key}: {e}")))?;

        if self.max_bytes.is_some() {
            self.evict()?;
        }

        Ok(())
    }

    /// Delete least-recently-modified entries until total size is within
    /// `max_bytes`. A no-op when no budget is configured.
    fn evict(&self) -> Result<(), EngineError> {
        let Some(max_bytes) = self.max_bytes else { return Ok(()) };

        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let dir = fs::read_dir(&self.root)
            .map_err(|e| EngineError::Engine(format!("cannot read cache dir {}: {e}", self.root.display())))?;
        for entry in dir {
            let entry = entry.map_err(|e| EngineError::Engine(format!("cannot read cache entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| EngineError::Engine(format!("cannot stat cache entry {}: {e}", path.display())))?;
            let modified = metadata
                .modified()
                .map_err(|e| EngineError::Engine(format!("cannot read mtime for {}: {e}", path.display())))?;
            entries.push((path, metadata.len(), modified));
        }

        let mut total: u64 = entries.iter().map(|(_, size, _)| size).sum();
        if total <= max_bytes {
            return Ok(());
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        for (path, size, _) in entries {
            if total <= max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(size);
                tracing::debug!(path = %path.display(), "evicted cache entry");
            }
        }

        Ok(())
    }
}
