//! Fetch pipeline: validate, download, persist, index.
//!
//! The pipeline is generic over a [`Fetcher`], which produces the raw bytes
//! for a cache key. Remote images use [`HttpFetcher`]; the aggregator plugs in
//! a provider-backed fetcher so product queries run through the exact same
//! pipeline and cache primitives.
//!
//! The pipeline never retries internally; a later `resolve` call is the retry
//! mechanism. Every fetch is bounded by a per-request timeout, and a timeout
//! is reported as a transport failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey, PayloadStore};
use crate::error::FetchError;
use crate::BoxFuture;

/// Produces the raw payload bytes for a source locator.
///
/// Dyn-compatible so pipelines can share heterogeneous fetchers behind
/// `Arc<dyn Fetcher>`.
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch the bytes identified by `source_ref`.
    fn fetch(&self, key: &CacheKey, source_ref: &str)
        -> BoxFuture<'_, Result<Vec<u8>, FetchError>>;
}

/// Trait for HTTP GET operations.
///
/// This abstraction allows dependency injection of mock clients in tests,
/// keeping every pipeline test network-free.
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET request and returns the response body.
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, FetchError>>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::transport("-", format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        let url = url.to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| FetchError::transport(&url, format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::transport(&url, format!("HTTP {status}")));
            }

            let body = response
                .bytes()
                .await
                .map_err(|e| FetchError::transport(&url, format!("body read failed: {e}")))?;
            Ok(body.to_vec())
        })
    }
}

/// Validate an image source locator without touching the network.
///
/// Empty or non-http(s) locators are rejected as `InvalidSource`.
pub fn validate_source(source_ref: &str) -> Result<reqwest::Url, FetchError> {
    let trimmed = source_ref.trim();
    if trimmed.is_empty() {
        return Err(FetchError::invalid_source("empty locator"));
    }
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| FetchError::invalid_source(format!("unparseable locator: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::invalid_source(format!(
            "unsupported scheme: {other}"
        ))),
    }
}

/// HTTP-backed fetcher for remote images.
pub struct HttpFetcher {
    http: Arc<dyn HttpClient>,
}

impl HttpFetcher {
    /// Creates a fetcher over the given HTTP client.
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(
        &self,
        _key: &CacheKey,
        source_ref: &str,
    ) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        let source_ref = source_ref.to_string();
        Box::pin(async move {
            let url = validate_source(&source_ref)?;
            self.http.get(url.as_str()).await
        })
    }
}

/// Downloads a resource, persists the payload, and builds its cache entry.
pub struct FetchPipeline {
    fetcher: Arc<dyn Fetcher>,
    payloads: Arc<PayloadStore>,
    ttl: Duration,
    timeout: Duration,
}

impl FetchPipeline {
    /// Creates a pipeline for one resource class.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Byte source (HTTP for images, provider-backed for queries)
    /// * `payloads` - Payload store for this resource class
    /// * `ttl` - Expiry horizon for new entries (policy input)
    /// * `timeout` - Per-request bound; expiry becomes a transport failure
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        payloads: Arc<PayloadStore>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            payloads,
            ttl,
            timeout,
        }
    }

    /// Fetch `source_ref` and persist it under `key`.
    ///
    /// On success the returned entry expires `ttl` from now. Never retries.
    pub async fn fetch(
        &self,
        key: &CacheKey,
        source_ref: &str,
    ) -> Result<CacheEntry, FetchError> {
        let bytes = tokio::time::timeout(self.timeout, self.fetcher.fetch(key, source_ref))
            .await
            .map_err(|_| {
                FetchError::transport(
                    source_ref,
                    format!("timed out after {:?}", self.timeout),
                )
            })??;

        let (local_ref, size_bytes) = self.payloads.write(key, &bytes).await?;

        debug!(key = %key, bytes = size_bytes, "Fetch completed");
        Ok(CacheEntry::new(
            key.clone(),
            source_ref,
            local_ref,
            size_bytes,
            Utc::now(),
            self.ttl,
        ))
    }
}
