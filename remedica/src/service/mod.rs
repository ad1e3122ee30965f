//! Public cache service consumed by UI code.
//!
//! `CacheService` wires the coordinator, fetch pipeline, fallback resolver,
//! sweeper, and aggregator together over one cache directory. It is
//! constructed once at process start and passed by reference to callers;
//! single-instance semantics without hidden global state.
//!
//! No error dialogs originate from this layer: image lookups are total and
//! degrade to placeholders, and provider failures come back as per-provider
//! summaries.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::{AggregateOutcome, Aggregator, ProductProvider, ProductRecord,
    ProviderError};
use crate::cache::{CacheIndex, CacheKey, PayloadStore, SweepStats, Sweeper, TransformOptions};
use crate::coordinator::{Reference, RequestCoordinator};
use crate::error::FetchError;
use crate::fallback::FallbackRef;
use crate::fetch::{FetchPipeline, HttpClient, HttpFetcher, ReqwestClient};

/// Configuration for [`CacheService::start`].
#[derive(Clone, Debug)]
pub struct CacheServiceConfig {
    /// Root cache directory; indexes and payload subdirectories live here.
    pub root_dir: PathBuf,
    /// Expiry horizon for cached images. Policy input, default 7 days.
    pub image_ttl: Duration,
    /// Expiry horizon for cached product-query results. Default 10 minutes.
    pub query_ttl: Duration,
    /// Per-request fetch bound; expiry degrades to fallback.
    pub fetch_timeout: Duration,
    /// Optional total-size budget for the image class.
    pub max_image_bytes: Option<u64>,
    /// Interval between background sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            root_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("remedica"),
            image_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            query_ttl: Duration::from_secs(10 * 60),
            fetch_timeout: Duration::from_secs(20),
            max_image_bytes: Some(256 * 1024 * 1024),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Combined statistics over both resource classes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Entries across images and product queries.
    pub entry_count: usize,
    /// Payload bytes across both classes.
    pub total_bytes: u64,
    /// Creation time of the oldest entry, if any.
    pub oldest_entry: Option<DateTime<Utc>>,
    /// Creation time of the newest entry, if any.
    pub newest_entry: Option<DateTime<Utc>>,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} bytes",
            self.entry_count, self.total_bytes
        )
    }
}

/// What a UI caller gets back for an image request. Always usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Reference to render.
    pub reference: Reference,
    /// Whether this is a degraded fallback (render a stale/offline hint).
    pub is_fallback: bool,
    /// Whether a fetch is still in flight behind this handle.
    pub is_loading: bool,
}

/// The cache service: one instance per process.
pub struct CacheService {
    images: RequestCoordinator,
    image_index: Arc<CacheIndex>,
    image_payloads: Arc<PayloadStore>,
    query_index: Arc<CacheIndex>,
    query_payloads: Arc<PayloadStore>,
    aggregator: Aggregator,
    image_budget: Option<u64>,
    shutdown: CancellationToken,
}

impl CacheService {
    /// Start the service with a real HTTP client.
    ///
    /// Opens both indexes, spawns the background sweepers, and registers
    /// the given catalog providers.
    pub async fn start(
        config: CacheServiceConfig,
        providers: Vec<Arc<dyn ProductProvider>>,
    ) -> Result<Self, FetchError> {
        let http = Arc::new(ReqwestClient::new(config.fetch_timeout)?);
        Self::start_with(config, http, providers).await
    }

    /// Start the service with an injected HTTP client (used by tests).
    pub async fn start_with(
        config: CacheServiceConfig,
        http: Arc<dyn HttpClient>,
        providers: Vec<Arc<dyn ProductProvider>>,
    ) -> Result<Self, FetchError> {
        let image_index = Arc::new(CacheIndex::open(&config.root_dir, "images").await?);
        let image_payloads =
            Arc::new(PayloadStore::open(config.root_dir.join("images")).await?);
        let query_index =
            Arc::new(CacheIndex::open(&config.root_dir, "product-queries").await?);
        let query_payloads =
            Arc::new(PayloadStore::open(config.root_dir.join("queries")).await?);

        let images = RequestCoordinator::new(
            Arc::clone(&image_index),
            Arc::clone(&image_payloads),
            FetchPipeline::new(
                Arc::new(HttpFetcher::new(http)),
                Arc::clone(&image_payloads),
                config.image_ttl,
                config.fetch_timeout,
            ),
        );

        let mut aggregator = Aggregator::new(
            Arc::clone(&query_index),
            Arc::clone(&query_payloads),
            config.query_ttl,
            config.fetch_timeout,
        );
        for provider in providers {
            aggregator.register(provider);
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(
            Sweeper::new(
                Arc::clone(&image_index),
                Arc::clone(&image_payloads),
                config.max_image_bytes,
            )
            .run(config.sweep_interval, shutdown.child_token()),
        );
        tokio::spawn(
            Sweeper::new(
                Arc::clone(&query_index),
                Arc::clone(&query_payloads),
                None,
            )
            .run(config.sweep_interval, shutdown.child_token()),
        );

        info!(root = %config.root_dir.display(), "Cache service started");
        Ok(Self {
            images,
            image_index,
            image_payloads,
            query_index,
            query_payloads,
            aggregator,
            image_budget: config.max_image_bytes,
            shutdown,
        })
    }

    /// Stop the background sweepers.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run one sweep pass over both resource classes immediately.
    pub async fn sweep_now(&self) -> Result<SweepStats, FetchError> {
        let images = Sweeper::new(
            Arc::clone(&self.image_index),
            Arc::clone(&self.image_payloads),
            self.image_budget,
        )
        .sweep()
        .await?;
        let queries = Sweeper::new(
            Arc::clone(&self.query_index),
            Arc::clone(&self.query_payloads),
            None,
        )
        .sweep()
        .await?;

        Ok(SweepStats {
            expired: images.expired + queries.expired,
            orphaned: images.orphaned + queries.orphaned,
            evicted: images.evicted + queries.evicted,
            bytes_freed: images.bytes_freed + queries.bytes_freed,
        })
    }

    /// Resolve an image, awaiting the fetch if one is needed.
    ///
    /// Total: for any input, including empty or malformed URLs and failing
    /// fetches, the handle carries a usable reference.
    pub async fn get_image(
        &self,
        url: &str,
        fallback: FallbackRef,
        transform: TransformOptions,
    ) -> ImageHandle {
        let key = CacheKey::for_image(url, &transform);
        let resolution = self.images.resolve(&key, url, fallback).await;
        ImageHandle {
            is_fallback: resolution.is_fallback(),
            reference: resolution.reference,
            is_loading: false,
        }
    }

    /// Resolve an image without awaiting a cold fetch.
    ///
    /// A fresh cache hit comes back live. Otherwise the fetch is started
    /// (or joined) in the background and the caller gets an immediate
    /// degraded handle with `is_loading` set; a later [`Self::get_image`]
    /// for the same key coalesces onto the in-flight fetch.
    pub async fn get_image_eager(
        &self,
        url: &str,
        fallback: FallbackRef,
        transform: TransformOptions,
    ) -> ImageHandle {
        let key = CacheKey::for_image(url, &transform);

        if let Some(entry) = self.image_index.get(&key) {
            if !entry.is_expired(Utc::now()) && PayloadStore::exists(&entry.local_ref).await {
                return ImageHandle {
                    reference: Reference::File(entry.local_ref),
                    is_fallback: false,
                    is_loading: false,
                };
            }
        }

        self.images.spawn_refresh(&key, url, fallback.clone());
        let resolution = self.images.resolve_fallback(&key, &fallback).await;
        ImageHandle {
            is_fallback: true,
            reference: resolution.reference,
            is_loading: true,
        }
    }

    /// Best-effort cache warm. Per-URL failures are swallowed individually.
    pub async fn preload(&self, urls: &[String]) {
        let warms = urls.iter().map(|url| {
            let key = CacheKey::for_image(url, &TransformOptions::default());
            async move {
                let resolution = self
                    .images
                    .resolve(&key, url, FallbackRef::None)
                    .await;
                if resolution.is_fallback() {
                    debug!(url = %url, "Preload fell back; skipping");
                }
            }
        });
        join_all(warms).await;
    }

    /// Remove a single cached image.
    pub async fn invalidate_image(
        &self,
        url: &str,
        transform: TransformOptions,
    ) -> Result<bool, FetchError> {
        let key = CacheKey::for_image(url, &transform);
        Ok(self.images.invalidate(&key).await?)
    }

    /// Combined statistics over images and product queries.
    pub fn cache_stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        for index in [&self.image_index, &self.query_index] {
            let s = index.stats();
            stats.entry_count += s.entry_count;
            stats.total_bytes += s.total_bytes;
            stats.oldest_entry = match (stats.oldest_entry, s.oldest_entry) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            stats.newest_entry = match (stats.newest_entry, s.newest_entry) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }
        stats
    }

    /// Wipe both indexes and payload stores entirely.
    pub async fn clear_cache(&self) -> Result<(), FetchError> {
        self.image_index.clear();
        self.query_index.clear();
        self.image_index.persist().await?;
        self.query_index.persist().await?;
        self.image_payloads.clear().await?;
        self.query_payloads.clear().await?;
        info!("Cache cleared");
        Ok(())
    }

    /// Fan a product query out to the named providers.
    pub async fn query_products(
        &self,
        provider_ids: &[String],
        category: Option<&str>,
        search_term: Option<&str>,
        limit: usize,
    ) -> AggregateOutcome {
        self.aggregator
            .query(provider_ids, category, search_term, limit)
            .await
    }

    /// Query a single provider.
    pub async fn query_provider(
        &self,
        provider_id: &str,
        category: Option<&str>,
        search_term: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ProductRecord>, ProviderError> {
        self.aggregator
            .query_provider(provider_id, category, search_term, limit)
            .await
    }

    /// Registered catalog provider ids.
    pub fn provider_ids(&self) -> Vec<String> {
        self.aggregator.provider_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::StaticCatalogProvider;
    use crate::fetch::tests::MockHttpClient;

    fn config_in(dir: &std::path::Path) -> CacheServiceConfig {
        CacheServiceConfig {
            root_dir: dir.to_path_buf(),
            sweep_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    fn record(name: &str, price: f64, provider_id: &str) -> ProductRecord {
        ProductRecord {
            id: name.to_lowercase().replace(' ', "-"),
            name: name.to_string(),
            generic_name: None,
            price,
            currency: "ZAR".to_string(),
            in_stock: true,
            provider_id: provider_id.to_string(),
            rating: None,
        }
    }

    async fn service_with(
        dir: &std::path::Path,
        client: Arc<MockHttpClient>,
    ) -> CacheService {
        let providers: Vec<Arc<dyn ProductProvider>> = vec![Arc::new(
            StaticCatalogProvider::new(
                "dischem",
                "Dis-Chem",
                vec![record("Panado", 29.95, "dischem")],
            ),
        )];
        CacheService::start_with(config_in(dir), client, providers)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_image_live_path() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"image bytes"));
        let service = service_with(dir.path(), Arc::clone(&client)).await;

        let handle = service
            .get_image(
                "https://cdn.example/a.png",
                FallbackRef::None,
                TransformOptions::default(),
            )
            .await;

        assert!(!handle.is_fallback);
        assert!(!handle.is_loading);
        assert!(matches!(handle.reference, Reference::File(_)));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_get_image_is_total_for_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"bytes"));
        let service = service_with(dir.path(), Arc::clone(&client)).await;

        for url in ["", "not a url", "ftp://x/y.png"] {
            let handle = service
                .get_image(url, FallbackRef::None, TransformOptions::default())
                .await;
            assert_eq!(handle.reference, Reference::Placeholder, "url: {url:?}");
            assert!(handle.is_fallback);
        }
        // Malformed locators never reach the network.
        assert_eq!(client.call_count(), 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_get_image_failed_fetch_uses_caller_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::failing("HTTP 500"));
        let service = service_with(dir.path(), client).await;

        let handle = service
            .get_image(
                "https://cdn.example/a.png",
                FallbackRef::OpaqueHandle("pill-placeholder".to_string()),
                TransformOptions::default(),
            )
            .await;

        assert_eq!(
            handle.reference,
            Reference::Handle("pill-placeholder".to_string())
        );
        assert!(handle.is_fallback);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_get_image_eager_cold_key_is_loading() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"image bytes"));
        let service = service_with(dir.path(), Arc::clone(&client)).await;

        let url = "https://cdn.example/a.png";
        let eager = service
            .get_image_eager(url, FallbackRef::None, TransformOptions::default())
            .await;
        assert!(eager.is_loading);
        assert!(eager.is_fallback);
        assert_eq!(eager.reference, Reference::Placeholder);

        // The background fetch settles; the awaited call coalesces or hits.
        let settled = service
            .get_image(url, FallbackRef::None, TransformOptions::default())
            .await;
        assert!(!settled.is_fallback);
        assert_eq!(client.call_count(), 1);

        // Warm key now resolves live without loading.
        let warm = service
            .get_image_eager(url, FallbackRef::None, TransformOptions::default())
            .await;
        assert!(!warm.is_loading);
        assert!(!warm.is_fallback);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_preload_swallows_per_url_errors() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"bytes"));
        let service = service_with(dir.path(), Arc::clone(&client)).await;

        let urls = vec![
            "https://cdn.example/a.png".to_string(),
            "".to_string(),
            "https://cdn.example/b.png".to_string(),
        ];
        service.preload(&urls).await;

        // The two valid URLs were fetched despite the bad one.
        assert_eq!(client.call_count(), 2);
        assert_eq!(service.cache_stats().entry_count, 2);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"image bytes"));
        let service = service_with(dir.path(), client).await;

        service
            .get_image(
                "https://cdn.example/a.png",
                FallbackRef::None,
                TransformOptions::default(),
            )
            .await;
        service
            .query_products(&["dischem".to_string()], None, Some("panado"), 10)
            .await;

        let stats = service.cache_stats();
        assert_eq!(stats.entry_count, 2);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest_entry.is_some());
        assert!(stats.newest_entry.is_some());

        service.clear_cache().await.unwrap();
        assert_eq!(service.cache_stats(), CacheStats::default());
        service.shutdown();
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"bytes"));
        let service = service_with(dir.path(), Arc::clone(&client)).await;

        let url = "https://cdn.example/a.png";
        service
            .get_image(url, FallbackRef::None, TransformOptions::default())
            .await;
        assert!(service
            .invalidate_image(url, TransformOptions::default())
            .await
            .unwrap());
        service
            .get_image(url, FallbackRef::None, TransformOptions::default())
            .await;

        assert_eq!(client.call_count(), 2);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_query_products_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockHttpClient::ok(b"bytes"));
        let service = service_with(dir.path(), client).await;

        let outcome = service
            .query_products(&["dischem".to_string()], None, Some("panado"), 10)
            .await;
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].name, "Panado");

        let single = service
            .query_provider("dischem", None, Some("panado"), 10)
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        service.shutdown();
    }
}
