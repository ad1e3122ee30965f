//! Durable index store.
//!
//! The index maps cache keys to [`CacheEntry`] metadata and survives process
//! restarts. Lookups and mutations hit an in-memory map; durability comes from
//! persisting a full JSON snapshot with write-new-then-rename, so a crash can
//! never leave a torn index on disk. A missing or corrupt snapshot is not
//! fatal: the index starts empty and the cache repopulates itself.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;

/// Point-in-time statistics over one index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    /// Number of entries in the index.
    pub entry_count: usize,
    /// Sum of payload sizes across all entries.
    pub total_bytes: u64,
    /// Creation time of the oldest entry, if any.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Creation time of the newest entry, if any.
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Key→metadata map for one resource class, persisted as a JSON snapshot.
pub struct CacheIndex {
    name: String,
    snapshot_path: PathBuf,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Serializes snapshot writes so concurrent persists cannot interleave
    /// their temp-file renames.
    persist_lock: tokio::sync::Mutex<()>,
}

impl CacheIndex {
    /// Open (or create) the index for `name` under `dir`.
    ///
    /// Loads the previous snapshot if one exists. A snapshot that fails to
    /// parse is logged and discarded.
    pub async fn open(dir: &Path, name: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let snapshot_path = dir.join(format!("{name}.index.json"));

        let entries = match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
                Ok(list) => {
                    debug!(index = name, entries = list.len(), "Loaded index snapshot");
                    list.into_iter().map(|e| (e.key.clone(), e)).collect()
                }
                Err(e) => {
                    warn!(index = name, error = %e, "Corrupt index snapshot, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            name: name.to_string(),
            snapshot_path,
            entries: RwLock::new(entries),
            persist_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or replace the entry for its key, returning the superseded
    /// entry if one existed.
    pub fn upsert(&self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.write().insert(entry.key.clone(), entry)
    }

    /// Remove the entry for `key`, returning it if present.
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.write().remove(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of entries currently indexed.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries, ordered oldest-created first.
    ///
    /// This is the eviction order: creation time approximates LRU because
    /// access time is not tracked.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let mut list: Vec<CacheEntry> = self.entries.read().values().cloned().collect();
        list.sort_by_key(|e| e.created_at);
        list
    }

    /// Compute statistics over the current contents.
    pub fn stats(&self) -> IndexStats {
        let entries = self.entries.read();
        let mut stats = IndexStats {
            entry_count: entries.len(),
            ..Default::default()
        };
        for entry in entries.values() {
            stats.total_bytes += entry.size_bytes;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) => t.min(entry.created_at),
                None => entry.created_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) => t.max(entry.created_at),
                None => entry.created_at,
            });
        }
        stats
    }

    /// Persist the current contents as a full snapshot.
    ///
    /// Writes `<name>.index.json.tmp` and renames it over the live snapshot
    /// so readers never observe a partially written index.
    pub async fn persist(&self) -> io::Result<()> {
        let _guard = self.persist_lock.lock().await;

        let list = self.snapshot();
        let bytes = serde_json::to_vec_pretty(&list).map_err(io::Error::other)?;

        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.snapshot_path).await?;

        debug!(index = %self.name, entries = list.len(), "Persisted index snapshot");
        Ok(())
    }
}
