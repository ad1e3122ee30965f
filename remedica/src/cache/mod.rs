//! Cache primitives: keys, entries, the durable index, payload storage,
//! and the eviction sweeper.
//!
//! Two resource classes share these primitives: remote images (long TTL)
//! and aggregated product-query results (short TTL). Each class gets its
//! own index file and payload directory under the cache root.

mod entry;
mod index;
mod key;
mod payload;
mod sweeper;

pub use entry::CacheEntry;
pub use index::{CacheIndex, IndexStats};
pub use key::{CacheKey, TransformOptions};
pub use payload::PayloadStore;
pub use sweeper::{SweepStats, Sweeper};
