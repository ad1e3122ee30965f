//! Multi-provider product query aggregation.
//!
//! Fans one logical query out to every requested provider concurrently,
//! each through its own coordinator-backed cache keyed by
//! `(provider_id, category, search_term)`, then merges and ranks whatever
//! subset succeeded. One provider's outage never fails the whole query;
//! if every provider fails the caller gets an empty result set plus the
//! per-provider error summary, never an error.

mod provider;
mod rank;

pub use provider::{ProductProvider, ProductRecord, ProviderError, SearchParams,
    StaticCatalogProvider};
pub use rank::{match_score, rank};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::{CacheIndex, CacheKey, PayloadStore};
use crate::coordinator::{Reference, RequestCoordinator};
use crate::error::FetchError;
use crate::fallback::FallbackRef;
use crate::fetch::{FetchPipeline, Fetcher};
use crate::BoxFuture;

/// Adapts a [`ProductProvider`] to the fetch pipeline.
///
/// The `source_ref` for a query entry is the serialized [`SearchParams`];
/// the payload is the JSON-encoded record list, so query results flow
/// through the same index/payload primitives as images.
struct ProviderFetcher {
    provider: Arc<dyn ProductProvider>,
}

impl Fetcher for ProviderFetcher {
    fn fetch(
        &self,
        _key: &CacheKey,
        source_ref: &str,
    ) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        let source_ref = source_ref.to_string();
        Box::pin(async move {
            let params: SearchParams = serde_json::from_str(&source_ref)
                .map_err(|e| FetchError::invalid_source(format!("bad query locator: {e}")))?;
            let records = self
                .provider
                .search(&params)
                .await
                .map_err(|e| FetchError::transport(&source_ref, e.to_string()))?;
            serde_json::to_vec(&records)
                .map_err(|e| FetchError::Storage(std::io::Error::other(e)))
        })
    }
}

struct ProviderSlot {
    provider: Arc<dyn ProductProvider>,
    coordinator: RequestCoordinator,
}

/// Merged outcome of an aggregate query.
#[derive(Debug, Clone, Default)]
pub struct AggregateOutcome {
    /// Globally ranked records from every provider that succeeded.
    pub results: Vec<ProductRecord>,
    /// One entry per provider that failed, scoped to that provider.
    pub errors: Vec<ProviderError>,
}

impl AggregateOutcome {
    /// Whether any provider failed while producing this outcome.
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Fan-out aggregator over independent catalog providers.
pub struct Aggregator {
    index: Arc<CacheIndex>,
    payloads: Arc<PayloadStore>,
    query_ttl: Duration,
    timeout: Duration,
    providers: HashMap<String, ProviderSlot>,
}

impl Aggregator {
    /// Creates an aggregator over the product-query cache.
    ///
    /// # Arguments
    ///
    /// * `index` - Query-class index (short TTL entries)
    /// * `payloads` - Query-class payload store (JSON record lists)
    /// * `query_ttl` - Expiry horizon for cached query results
    /// * `timeout` - Per-provider request bound
    pub fn new(
        index: Arc<CacheIndex>,
        payloads: Arc<PayloadStore>,
        query_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            payloads,
            query_ttl,
            timeout,
            providers: HashMap::new(),
        }
    }

    /// Register a provider, giving it its own coordinator over the shared
    /// query cache.
    pub fn register(&mut self, provider: Arc<dyn ProductProvider>) {
        let pipeline = FetchPipeline::new(
            Arc::new(ProviderFetcher {
                provider: Arc::clone(&provider),
            }),
            Arc::clone(&self.payloads),
            self.query_ttl,
            self.timeout,
        );
        let coordinator = RequestCoordinator::new(
            Arc::clone(&self.index),
            Arc::clone(&self.payloads),
            pipeline,
        );
        debug!(provider = provider.id(), "Registered catalog provider");
        self.providers.insert(
            provider.id().to_string(),
            ProviderSlot {
                provider,
                coordinator,
            },
        );
    }

    /// Registered provider ids.
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Fan the query out to `provider_ids`, merge, rank, and truncate.
    ///
    /// Waits for every provider to settle independently; partial failure
    /// yields partial results. Truncation to `limit` happens only after the
    /// global sort.
    pub async fn query(
        &self,
        provider_ids: &[String],
        category: Option<&str>,
        search_term: Option<&str>,
        limit: usize,
    ) -> AggregateOutcome {
        let calls = provider_ids.iter().map(|id| async move {
            (id.clone(), self.query_one(id, category, search_term).await)
        });

        let mut outcome = AggregateOutcome::default();
        for (id, result) in join_all(calls).await {
            match result {
                Ok(records) => outcome.results.extend(records),
                Err(e) => {
                    warn!(provider = %id, error = %e, "Provider query failed");
                    outcome.errors.push(e);
                }
            }
        }

        rank(&mut outcome.results, search_term);
        outcome.results.truncate(limit);
        outcome
    }

    /// Query a single provider, ranked and truncated the same way.
    pub async fn query_provider(
        &self,
        provider_id: &str,
        category: Option<&str>,
        search_term: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ProductRecord>, ProviderError> {
        let mut records = self.query_one(provider_id, category, search_term).await?;
        rank(&mut records, search_term);
        records.truncate(limit);
        Ok(records)
    }

    /// One provider's records, through its coordinator-backed cache.
    async fn query_one(
        &self,
        provider_id: &str,
        category: Option<&str>,
        search_term: Option<&str>,
    ) -> Result<Vec<ProductRecord>, ProviderError> {
        let slot = self
            .providers
            .get(provider_id)
            .ok_or_else(|| ProviderError::new(provider_id, "unknown provider"))?;

        let params = SearchParams {
            category: category.map(str::to_string),
            search_term: search_term.map(str::to_string),
        };
        let source_ref = serde_json::to_string(&params)
            .map_err(|e| ProviderError::new(provider_id, format!("bad query: {e}")))?;
        let key = CacheKey::for_query(provider_id, category, search_term);

        let resolution = slot
            .coordinator
            .resolve(&key, &source_ref, FallbackRef::None)
            .await;

        let stale = resolution.is_fallback();
        match resolution.reference {
            Reference::File(path) => {
                if stale {
                    debug!(provider = provider_id, "Serving stale query results");
                }
                let bytes = slot
                    .coordinator
                    .payloads()
                    .read(&path)
                    .await
                    .map_err(|e| ProviderError::new(provider_id, format!("read failed: {e}")))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| ProviderError::new(provider_id, format!("decode failed: {e}")))
            }
            // No live result and nothing cached to degrade onto.
            _ => Err(ProviderError::new(
                slot.provider.id(),
                "provider unavailable and no cached results",
            )),
        }
    }
}
