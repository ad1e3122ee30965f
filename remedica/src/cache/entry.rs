//! Cache entry metadata.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::key::CacheKey;

/// Metadata for one cached resource.
///
/// An entry is created only by a successful fetch; a fresh fetch for the same
/// key wholesale-replaces the previous entry. `local_ref` must point at an
/// existing payload file while the entry is in the index; the sweeper and
/// fallback resolver remove entries whose payload has gone missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Deterministic cache key.
    pub key: CacheKey,
    /// The remote locator (or serialized query) this entry was fetched from.
    pub source_ref: String,
    /// Path of the payload file on disk.
    pub local_ref: PathBuf,
    /// Payload size as written, in bytes.
    pub size_bytes: u64,
    /// Creation instant; also the eviction ordering key.
    pub created_at: DateTime<Utc>,
    /// Expiry instant, always strictly after `created_at`.
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry expiring `ttl` after `created_at`.
    ///
    /// The TTL is clamped to at least one second so `expires_at > created_at`
    /// holds even for a zero policy value.
    pub fn new(
        key: CacheKey,
        source_ref: impl Into<String>,
        local_ref: PathBuf,
        size_bytes: u64,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl.max(Duration::from_secs(1)))
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        Self {
            key,
            source_ref: source_ref.into(),
            local_ref,
            size_bytes,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Whether the entry has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::TransformOptions;

    fn test_entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new(
            CacheKey::for_image("https://cdn.example/a.png", &TransformOptions::default()),
            "https://cdn.example/a.png",
            PathBuf::from("/tmp/payload.bin"),
            1024,
            Utc::now(),
            ttl,
        )
    }

    #[test]
    fn test_expiry_is_after_creation() {
        let entry = test_entry(Duration::from_secs(60));
        assert!(entry.expires_at > entry.created_at);
    }

    #[test]
    fn test_zero_ttl_still_expires_after_creation() {
        let entry = test_entry(Duration::ZERO);
        assert!(entry.expires_at > entry.created_at);
    }

    #[test]
    fn test_fresh_entry_is_not_expired() {
        let entry = test_entry(Duration::from_secs(60));
        assert!(!entry.is_expired(Utc::now()));
    }

    #[test]
    fn test_entry_expires_at_horizon() {
        let entry = test_entry(Duration::from_secs(60));
        let at_horizon = entry.expires_at;
        assert!(entry.is_expired(at_horizon));
        assert!(entry.is_expired(at_horizon + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = test_entry(Duration::from_secs(60));
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
