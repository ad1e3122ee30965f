//! Request coordinator: per-key deduplication of concurrent fetches.
//!
//! A `resolve` call either returns a fresh index hit immediately, joins an
//! in-flight fetch for the same key, or registers a new fetch task. The
//! check-then-register step happens under a single mutex with no await point
//! in between, so two callers can never both start a fetch for one key.
//!
//! The fetch task runs detached (`tokio::spawn`): a caller that stops
//! awaiting does not cancel it, so other waiters and future cache hits still
//! benefit. On settlement the task deregisters itself on every exit path and
//! fans the single result out to all waiters over a broadcast channel.
//! Failures are routed through the fallback resolver, never to the caller.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::{CacheIndex, CacheKey, PayloadStore};
use crate::fallback::{FallbackRef, FallbackResolver};
use crate::fetch::FetchPipeline;

/// A usable reference to a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A payload (or caller-supplied) file on disk.
    File(PathBuf),
    /// An opaque bundled-asset handle the caller can render directly.
    Handle(String),
    /// The built-in static placeholder.
    Placeholder,
}

/// Whether a resolution came from a live fetch/cache hit or a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Fresh cache hit or successful fetch.
    Live,
    /// Produced by the fallback resolver; render a degraded-state indicator.
    Fallback,
}

/// The outcome of resolving a resource. Always usable, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The reference to hand to the caller.
    pub reference: Reference,
    /// Live or fallback provenance.
    pub origin: Origin,
}

impl Resolution {
    /// Creates a resolution.
    pub fn new(reference: Reference, origin: Origin) -> Self {
        Self { reference, origin }
    }

    /// Whether this resolution is a degraded fallback.
    pub fn is_fallback(&self) -> bool {
        self.origin == Origin::Fallback
    }
}

/// Result of the atomic check-then-register step.
enum CoalesceResult {
    /// The index turned fresh while waiting for the lock; no fetch needed.
    Hit(Resolution),
    /// Await the (new or already in-flight) fetch for this key.
    Wait(broadcast::Receiver<Resolution>),
}

struct Inner {
    index: Arc<CacheIndex>,
    payloads: Arc<PayloadStore>,
    pipeline: FetchPipeline,
    fallback: FallbackResolver,
    /// In-flight fetches. Guarded check-then-insert is the one place that
    /// needs explicit synchronization; the lock is never held across await.
    pending: Mutex<HashMap<CacheKey, broadcast::Sender<Resolution>>>,
}

/// Deduplicating front door for one resource class's cache.
///
/// Cheap to clone; clones share the same pending map, index, and stores.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl RequestCoordinator {
    /// Creates a coordinator over one index/payload-store pair.
    pub fn new(
        index: Arc<CacheIndex>,
        payloads: Arc<PayloadStore>,
        pipeline: FetchPipeline,
    ) -> Self {
        let fallback = FallbackResolver::new(Arc::clone(&index));
        Self {
            inner: Arc::new(Inner {
                index,
                payloads,
                pipeline,
                fallback,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The index backing this coordinator.
    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.inner.index
    }

    /// The payload store backing this coordinator.
    pub fn payloads(&self) -> &Arc<PayloadStore> {
        &self.inner.payloads
    }

    /// Resolve `key`, fetching `source_ref` if needed. Total: failures come
    /// back as fallback resolutions, never as errors.
    pub async fn resolve(
        &self,
        key: &CacheKey,
        source_ref: &str,
        fallback: FallbackRef,
    ) -> Resolution {
        if let Some(res) = self.fresh_hit(key).await {
            return res;
        }

        match self.join_or_start(key, source_ref, fallback.clone()) {
            CoalesceResult::Hit(res) => res,
            CoalesceResult::Wait(mut rx) => match rx.recv().await {
                Ok(res) => res,
                // Fetch task dropped without settling; stay total.
                Err(e) => {
                    warn!(key = %key, error = %e, "Fetch task vanished, resolving fallback");
                    self.inner.fallback.resolve(key, &fallback).await
                }
            },
        }
    }

    /// Resolve without starting a fetch: the fallback chain only.
    pub async fn resolve_fallback(&self, key: &CacheKey, fallback: &FallbackRef) -> Resolution {
        self.inner.fallback.resolve(key, fallback).await
    }

    /// Start (or join) a background fetch for `key` without awaiting it.
    pub fn spawn_refresh(&self, key: &CacheKey, source_ref: &str, fallback: FallbackRef) {
        let _ = self.join_or_start(key, source_ref, fallback);
    }

    /// Whether a fetch for `key` is currently in flight.
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.inner.pending.lock().contains_key(key)
    }

    /// Remove the entry and payload for `key`.
    ///
    /// Returns whether an entry existed.
    pub async fn invalidate(&self, key: &CacheKey) -> io::Result<bool> {
        match self.inner.index.remove(key) {
            Some(entry) => {
                self.inner.payloads.remove(&entry.local_ref).await?;
                self.inner.index.persist().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A non-expired index hit whose payload still exists, if any.
    async fn fresh_hit(&self, key: &CacheKey) -> Option<Resolution> {
        let entry = self.inner.index.get(key)?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        if PayloadStore::exists(&entry.local_ref).await {
            return Some(Resolution::new(Reference::File(entry.local_ref), Origin::Live));
        }
        // Payload vanished underneath a live entry; self-heal and refetch.
        debug!(key = %key, "Indexed payload missing on disk, treating as miss");
        self.inner.index.remove(key);
        None
    }

    /// The atomic check-then-register step.
    ///
    /// Everything in here runs under the pending-map lock so concurrent
    /// callers for the same key converge on a single fetch task.
    fn join_or_start(
        &self,
        key: &CacheKey,
        source_ref: &str,
        fallback: FallbackRef,
    ) -> CoalesceResult {
        let mut pending = self.inner.pending.lock();

        if let Some(tx) = pending.get(key) {
            debug!(key = %key, "Coalesced onto in-flight fetch");
            return CoalesceResult::Wait(tx.subscribe());
        }

        // A fetch may have settled between the caller's miss and this lock.
        if let Some(entry) = self.inner.index.get(key) {
            if !entry.is_expired(Utc::now()) {
                return CoalesceResult::Hit(Resolution::new(
                    Reference::File(entry.local_ref),
                    Origin::Live,
                ));
            }
        }

        let (tx, rx) = broadcast::channel(1);
        pending.insert(key.clone(), tx.clone());
        drop(pending);

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        let source_ref = source_ref.to_string();
        tokio::spawn(async move {
            let resolution = inner.execute(&key, &source_ref, &fallback).await;
            // Deregister before fanning out: late callers must fall through
            // to the index rather than subscribe to a settled channel.
            inner.pending.lock().remove(&key);
            let _ = tx.send(resolution);
        });

        CoalesceResult::Wait(rx)
    }
}

impl Inner {
    /// Run the pipeline and settle to a resolution. Total.
    async fn execute(
        &self,
        key: &CacheKey,
        source_ref: &str,
        fallback: &FallbackRef,
    ) -> Resolution {
        match self.pipeline.fetch(key, source_ref).await {
            Ok(entry) => {
                let local_ref = entry.local_ref.clone();
                if let Some(old) = self.index.upsert(entry) {
                    if old.local_ref != local_ref {
                        if let Err(e) = self.payloads.remove(&old.local_ref).await {
                            warn!(key = %key, error = %e, "Failed to delete superseded payload");
                        }
                    }
                }
                if let Err(e) = self.index.persist().await {
                    warn!(key = %key, error = %e, "Failed to persist index after fetch");
                }
                Resolution::new(Reference::File(local_ref), Origin::Live)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Fetch failed, resolving fallback");
                self.fallback.resolve(key, fallback).await
            }
        }
    }
}
