//! Local payload store.
//!
//! Content-addressable storage of downloaded bytes: one file per entry under
//! a dedicated directory, named by the cache key. Writes go through a unique
//! temp file and an atomic rename, so a crash mid-download never leaves a
//! half-written payload under a live name.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::cache::key::CacheKey;

/// File-per-entry payload storage for one resource class.
pub struct PayloadStore {
    root: PathBuf,
    /// Monotonic counter making concurrent temp-file names unique.
    tmp_counter: AtomicU64,
}

impl PayloadStore {
    /// Open (or create) the payload directory.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// The payload directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic payload path for a key.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{key}.bin"))
    }

    /// Write `bytes` as the payload for `key`.
    ///
    /// Returns the final path and the size written. Replaces any previous
    /// payload for the same key.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> io::Result<(PathBuf, u64)> {
        let final_path = self.path_for(key);
        let tmp_path = self.root.join(format!(
            ".{key}.{}.tmp",
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        debug!(key = %key, bytes = bytes.len(), "Wrote payload");
        Ok((final_path, bytes.len() as u64))
    }

    /// Read a payload file.
    pub async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    /// Whether a payload file exists on disk.
    pub async fn exists(path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Delete a payload file.
    ///
    /// A missing file is not an error; returns whether a file was removed.
    pub async fn remove(&self, path: &Path) -> io::Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete every payload file and recreate the directory.
    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&self.root).await
    }
}
