//! Fallback resolution for failed or invalid fetches.
//!
//! The resolver is total: whatever happened upstream, the caller gets a
//! usable reference. Priority order:
//!
//! 1. A caller-supplied fallback, if it resolves locally.
//! 2. The last known-good entry for the same key, even if expired, as long
//!    as its payload still exists on disk. Stale beats absent.
//! 3. The built-in static placeholder.
//!
//! Every resolution produced here is tagged as a fallback so callers can
//! render a degraded-state indicator.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheIndex, CacheKey, PayloadStore};
use crate::coordinator::{Origin, Reference, Resolution};

/// A caller-supplied fallback resource.
///
/// UI code hands fallbacks over in loose shapes (a file path, an opaque asset
/// handle, or nothing); [`FallbackRef::normalize`] is the single conversion
/// point into this tagged form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FallbackRef {
    /// A local file path, used only if the file exists.
    LocalPath(PathBuf),
    /// An opaque bundled-asset handle, always resolvable by the caller.
    OpaqueHandle(String),
    /// No caller-supplied fallback.
    #[default]
    None,
}

impl FallbackRef {
    /// Normalize a loosely-typed fallback input.
    ///
    /// Empty or absent input is `None`; an `asset://` locator becomes an
    /// opaque handle; anything else is treated as a local path.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::None,
            Some(s) => match s.strip_prefix("asset://") {
                Some(id) if !id.is_empty() => Self::OpaqueHandle(id.to_string()),
                _ => Self::LocalPath(PathBuf::from(s)),
            },
        }
    }
}

/// Produces a degraded [`Resolution`] when the fetch pipeline cannot.
pub struct FallbackResolver {
    index: Arc<CacheIndex>,
}

impl FallbackResolver {
    /// Creates a resolver consulting `index` for stale entries.
    pub fn new(index: Arc<CacheIndex>) -> Self {
        Self { index }
    }

    /// Resolve a usable reference for `key`. Never fails.
    pub async fn resolve(&self, key: &CacheKey, fallback: &FallbackRef) -> Resolution {
        match fallback {
            FallbackRef::LocalPath(path) => {
                if PayloadStore::exists(path).await {
                    return Resolution::new(Reference::File(path.clone()), Origin::Fallback);
                }
                debug!(key = %key, path = %path.display(), "Caller fallback missing on disk");
            }
            FallbackRef::OpaqueHandle(id) => {
                return Resolution::new(Reference::Handle(id.clone()), Origin::Fallback);
            }
            FallbackRef::None => {}
        }

        // Stale beats absent: an expired entry whose payload survived is
        // still the best degraded answer for this key.
        if let Some(entry) = self.index.get(key) {
            if PayloadStore::exists(&entry.local_ref).await {
                return Resolution::new(Reference::File(entry.local_ref), Origin::Fallback);
            }
            // Payload vanished underneath the index; self-heal the row.
            self.index.remove(key);
            if let Err(e) = self.index.persist().await {
                warn!(key = %key, error = %e, "Failed to persist self-healed index");
            }
        }

        Resolution::new(Reference::Placeholder, Origin::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, TransformOptions};
    use chrono::Utc;
    use std::time::Duration;

    fn key(url: &str) -> CacheKey {
        CacheKey::for_image(url, &TransformOptions::default())
    }

    #[test]
    fn test_normalize_empty_input() {
        assert_eq!(FallbackRef::normalize(None), FallbackRef::None);
        assert_eq!(FallbackRef::normalize(Some("")), FallbackRef::None);
        assert_eq!(FallbackRef::normalize(Some("   ")), FallbackRef::None);
    }

    #[test]
    fn test_normalize_asset_handle() {
        assert_eq!(
            FallbackRef::normalize(Some("asset://pill-placeholder")),
            FallbackRef::OpaqueHandle("pill-placeholder".to_string())
        );
    }

    #[test]
    fn test_normalize_local_path() {
        assert_eq!(
            FallbackRef::normalize(Some("/data/assets/pill.png")),
            FallbackRef::LocalPath(PathBuf::from("/data/assets/pill.png"))
        );
    }

    #[tokio::test]
    async fn test_resolves_caller_path_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(CacheIndex::open(dir.path(), "images").await.unwrap());
        let resolver = FallbackResolver::new(index);

        let asset = dir.path().join("bundled.png");
        tokio::fs::write(&asset, b"asset").await.unwrap();

        let res = resolver
            .resolve(
                &key("https://cdn.example/a.png"),
                &FallbackRef::LocalPath(asset.clone()),
            )
            .await;
        assert_eq!(res.reference, Reference::File(asset));
        assert!(res.is_fallback());
    }

    #[tokio::test]
    async fn test_missing_caller_path_falls_through_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(CacheIndex::open(dir.path(), "images").await.unwrap());
        let resolver = FallbackResolver::new(index);

        let res = resolver
            .resolve(
                &key("https://cdn.example/a.png"),
                &FallbackRef::LocalPath(PathBuf::from("/nonexistent.png")),
            )
            .await;
        assert_eq!(res.reference, Reference::Placeholder);
    }

    #[tokio::test]
    async fn test_opaque_handle_always_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(CacheIndex::open(dir.path(), "images").await.unwrap());
        let resolver = FallbackResolver::new(index);

        let res = resolver
            .resolve(
                &key("https://cdn.example/a.png"),
                &FallbackRef::OpaqueHandle("ph".to_string()),
            )
            .await;
        assert_eq!(res.reference, Reference::Handle("ph".to_string()));
    }

    #[tokio::test]
    async fn test_stale_entry_beats_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(CacheIndex::open(dir.path(), "images").await.unwrap());

        let url = "https://cdn.example/a.png";
        let payload = dir.path().join("stale.bin");
        tokio::fs::write(&payload, b"stale bytes").await.unwrap();

        // Insert an already-expired entry whose payload still exists.
        let mut entry = CacheEntry::new(
            key(url),
            url,
            payload.clone(),
            11,
            Utc::now() - chrono::Duration::hours(2),
            Duration::from_secs(1),
        );
        entry.expires_at = Utc::now() - chrono::Duration::hours(1);
        index.upsert(entry);

        let resolver = FallbackResolver::new(Arc::clone(&index));
        let res = resolver.resolve(&key(url), &FallbackRef::None).await;
        assert_eq!(res.reference, Reference::File(payload));
        assert!(res.is_fallback());
    }

    #[tokio::test]
    async fn test_self_heals_entry_with_missing_payload() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(CacheIndex::open(dir.path(), "images").await.unwrap());

        let url = "https://cdn.example/a.png";
        let entry = CacheEntry::new(
            key(url),
            url,
            dir.path().join("vanished.bin"),
            11,
            Utc::now(),
            Duration::from_secs(60),
        );
        index.upsert(entry);

        let resolver = FallbackResolver::new(Arc::clone(&index));
        let res = resolver.resolve(&key(url), &FallbackRef::None).await;

        assert_eq!(res.reference, Reference::Placeholder);
        assert!(index.get(&key(url)).is_none(), "orphaned row should be removed");
    }
}
