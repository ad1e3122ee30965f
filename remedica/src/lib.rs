//! Remedica - resource caching core for the Remedica pharmacy companion
//!
//! This library provides the caching, fallback-resolution, and provider
//! aggregation layer that backs remote image loading and multi-pharmacy
//! product-catalog queries in the Remedica app.
//!
//! # Architecture
//!
//! ```text
//! UI code ──► CacheService ──► RequestCoordinator ──► FetchPipeline ──► HttpClient
//!                  │                  │                     │
//!                  │                  │ (failure)           ▼
//!                  │                  ▼                PayloadStore
//!                  │            FallbackResolver           │
//!                  │                                       ▼
//!                  ├──► Aggregator (fan-out)          CacheIndex
//!                  └──► Sweeper (background eviction)
//! ```
//!
//! The service is constructed once at process start and passed by reference;
//! there is no hidden global state.

pub mod aggregator;
pub mod cache;
pub mod coordinator;
pub mod error;
pub mod fallback;
pub mod fetch;
pub mod service;

pub use aggregator::{
    AggregateOutcome, Aggregator, ProductProvider, ProductRecord, ProviderError, SearchParams,
    StaticCatalogProvider,
};
pub use cache::{CacheEntry, CacheIndex, CacheKey, PayloadStore, SweepStats, Sweeper,
    TransformOptions};
pub use coordinator::{Origin, Reference, RequestCoordinator, Resolution};
pub use error::FetchError;
pub use fallback::{FallbackRef, FallbackResolver};
pub use fetch::{FetchPipeline, Fetcher, HttpClient, HttpFetcher, ReqwestClient};
pub use service::{CacheService, CacheServiceConfig, CacheStats, ImageHandle};

/// Boxed future type for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
