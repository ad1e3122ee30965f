//! Error taxonomy for the fetch path.
//!
//! Errors here never reach image callers directly: the coordinator routes
//! every failed fetch through the fallback resolver, which is total.
//! Aggregator providers surface their own scoped
//! [`ProviderError`](crate::aggregator::ProviderError) instead.

use thiserror::Error;

/// Errors that can occur while fetching and persisting a resource.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The source locator was malformed or empty. Never attempted over
    /// the network.
    #[error("invalid source locator: {reason}")]
    InvalidSource { reason: String },

    /// Non-success status, timeout, or connection failure.
    #[error("transport failure for {source_ref}: {reason}")]
    Transport { source_ref: String, reason: String },

    /// Disk write or stat failure while persisting a payload or index.
    #[error("storage failure: {0}")]
    Storage(#[from] std::io::Error),
}

impl FetchError {
    /// Build an `InvalidSource` error.
    pub fn invalid_source(reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            reason: reason.into(),
        }
    }

    /// Build a `Transport` error.
    pub fn transport(source_ref: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            source_ref: source_ref.into(),
            reason: reason.into(),
        }
    }
}
