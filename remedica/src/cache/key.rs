//! Deterministic cache key derivation.
//!
//! A key is the lowercase hex SHA-256 of the source locator plus a canonical
//! rendering of the transform options, so identical `(url, width, height,
//! quality)` requests always map to the same key and re-fetches are
//! idempotent. The key doubles as the payload file stem.
//!
//! # Key Inputs
//!
//! - Images: `url` + `|w=..|h=..|q=..`
//! - Product queries: `query:{provider_id}` + serialized search parameters

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Image transform parameters that participate in cache keying.
///
/// All fields are optional; an absent dimension is rendered as `-` in the
/// canonical form so `width: None` and `width: Some(0)` stay distinct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Target width in pixels.
    pub width: Option<u32>,
    /// Target height in pixels.
    pub height: Option<u32>,
    /// JPEG/WebP quality, 0-100.
    pub quality: Option<u8>,
}

impl TransformOptions {
    /// Canonical suffix used for key derivation.
    pub fn canonical(&self) -> String {
        fn part<T: fmt::Display>(v: &Option<T>) -> String {
            match v {
                Some(v) => v.to_string(),
                None => "-".to_string(),
            }
        }
        format!(
            "|w={}|h={}|q={}",
            part(&self.width),
            part(&self.height),
            part(&self.quality)
        )
    }
}

/// Deterministic identifier for a cached resource.
///
/// Stored in the index, used as the payload file stem, and used to key the
/// pending-fetch map in the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a remote image request.
    pub fn for_image(url: &str, transform: &TransformOptions) -> Self {
        Self::digest(&[url.as_bytes(), transform.canonical().as_bytes()])
    }

    /// Derive the key for a provider product query.
    ///
    /// The tuple `(provider_id, category, search_term)` fully identifies a
    /// logical query; terms are lowercased so case variants share an entry.
    pub fn for_query(
        provider_id: &str,
        category: Option<&str>,
        search_term: Option<&str>,
    ) -> Self {
        let category = category.unwrap_or("-").to_lowercase();
        let term = search_term.unwrap_or("-").to_lowercase();
        Self::digest(&[
            b"query:",
            provider_id.as_bytes(),
            b"|",
            category.as_bytes(),
            b"|",
            term.as_bytes(),
        ])
    }

    fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// The key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
