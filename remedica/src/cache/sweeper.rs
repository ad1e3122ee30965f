//! Eviction sweeper.
//!
//! Removes expired entries, self-heals orphaned rows whose payload vanished,
//! and enforces an optional total-size budget by evicting oldest-created
//! entries first (creation time approximates LRU; access time is not
//! tracked). Sweeps are idempotent and run alongside concurrent lookups;
//! they never block a `resolve` call.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::entry::CacheEntry;
use crate::cache::index::CacheIndex;
use crate::cache::payload::PayloadStore;

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries removed because their TTL elapsed.
    pub expired: usize,
    /// Entries removed because their payload was missing on disk.
    pub orphaned: usize,
    /// Entries evicted to get back under the size budget.
    pub evicted: usize,
    /// Total payload bytes freed.
    pub bytes_freed: u64,
}

impl SweepStats {
    /// Total entries removed by this pass.
    pub fn removed(&self) -> usize {
        self.expired + self.orphaned + self.evicted
    }
}

impl fmt::Display for SweepStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sweep: {} expired, {} orphaned, {} evicted, {} bytes freed",
            self.expired, self.orphaned, self.evicted, self.bytes_freed
        )
    }
}

/// Background eviction for one resource class.
pub struct Sweeper {
    index: Arc<CacheIndex>,
    payloads: Arc<PayloadStore>,
    /// Optional total-size budget; `None` disables size-based eviction.
    max_total_bytes: Option<u64>,
}

impl Sweeper {
    /// Creates a sweeper over one index/payload-store pair.
    pub fn new(
        index: Arc<CacheIndex>,
        payloads: Arc<PayloadStore>,
        max_total_bytes: Option<u64>,
    ) -> Self {
        Self {
            index,
            payloads,
            max_total_bytes,
        }
    }

    /// Run one sweep pass. Idempotent.
    pub async fn sweep(&self) -> io::Result<SweepStats> {
        let started = Instant::now();
        let now = Utc::now();
        let mut stats = SweepStats::default();

        let mut survivors: Vec<CacheEntry> = Vec::new();
        for entry in self.index.snapshot() {
            if entry.is_expired(now) {
                self.drop_entry(&entry).await;
                stats.expired += 1;
                stats.bytes_freed += entry.size_bytes;
            } else if !PayloadStore::exists(&entry.local_ref).await {
                // Row points at nothing; self-heal.
                self.index.remove(&entry.key);
                stats.orphaned += 1;
            } else {
                survivors.push(entry);
            }
        }

        if let Some(budget) = self.max_total_bytes {
            let mut total: u64 = survivors.iter().map(|e| e.size_bytes).sum();
            // Snapshot order is oldest-created first.
            let mut oldest_first = survivors.into_iter();
            while total > budget {
                let Some(entry) = oldest_first.next() else {
                    break;
                };
                self.drop_entry(&entry).await;
                total -= entry.size_bytes;
                stats.evicted += 1;
                stats.bytes_freed += entry.size_bytes;
            }
        }

        if stats.removed() > 0 {
            self.index.persist().await?;
            info!(
                expired = stats.expired,
                orphaned = stats.orphaned,
                evicted = stats.evicted,
                bytes_freed = stats.bytes_freed,
                duration_ms = started.elapsed().as_millis() as u64,
                "Sweep removed entries"
            );
        } else {
            debug!("Sweep found nothing to remove");
        }

        Ok(stats)
    }

    /// Remove an entry and best-effort delete its payload.
    async fn drop_entry(&self, entry: &CacheEntry) {
        self.index.remove(&entry.key);
        if let Err(e) = self.payloads.remove(&entry.local_ref).await {
            warn!(key = %entry.key, error = %e, "Failed to delete payload during sweep");
        }
    }

    /// Run sweeps on an interval until cancelled.
    ///
    /// Deliberately no pass at startup: an immediate sweep would delete
    /// expired entries before an offline launch can serve them as stale
    /// fallbacks. The first pass runs one interval after start.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "Sweeper starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Sweeper shutting down");
                    break;
                }

                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Scheduled sweep failed");
                    }
                }
            }
        }
    }
}
