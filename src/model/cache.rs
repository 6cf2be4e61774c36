//! Persistent storage for downloaded model bytes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Key/value store for model files, keyed by source URL.
pub trait ModelCache: Send + Sync {
    /// Stored bytes for `key`, if present.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `bytes` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes could not be persisted. Callers treat
    /// this as non-fatal.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Whether an entry exists for `key`.
    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Directory-backed cache. Each entry is one file named after a hash of the key.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Cache rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Cache under the platform cache directory, e.g.
    /// `~/.cache/mark-eraser/models` on Linux.
    #[must_use]
    pub fn platform_default() -> Option<Self> {
        let mut path = dirs::cache_dir().or_else(dirs::home_dir)?;
        path.push("mark-eraser");
        path.push("models");
        Some(Self::new(path))
    }

    /// Root directory of the cache.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:016x}.onnx", fnv1a(key.as_bytes())))
    }
}

impl ModelCache for DiskCache {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => None,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to read cached model {}: {e}", path.display());
                }
                None
            }
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(key);
        // Readers never observe a partially written entry.
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!("cached {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    fn contains(&self, key: &str) -> bool {
        fs::metadata(self.entry_path(key)).is_ok_and(|m| m.is_file() && m.len() > 0)
    }
}

/// 64-bit FNV-1a.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
