//! Product catalog provider abstraction.
//!
//! A provider is one independent upstream pharmacy catalog. Providers are
//! dyn-compatible so the aggregator can fan out over a heterogeneous set
//! behind `Arc<dyn ProductProvider>`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BoxFuture;

/// A normalized product record from one provider.
///
/// `id` is unique only within one provider's result set; `provider_id`
/// disambiguates across providers after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    /// Provider-scoped product identifier.
    pub id: String,
    /// Display name, e.g. "Panado Extra".
    pub name: String,
    /// Active-ingredient name used for substring matching, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_name: Option<String>,
    /// Unit price in `currency`.
    pub price: f64,
    /// ISO currency code, e.g. "ZAR".
    pub currency: String,
    /// Whether the provider reports the item as in stock.
    pub in_stock: bool,
    /// The provider this record came from.
    pub provider_id: String,
    /// Average customer rating, 0.0-5.0, if the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

/// The logical query fanned out to providers.
///
/// Serialized form doubles as the cache `source_ref` for query entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Optional catalog category filter.
    pub category: Option<String>,
    /// Optional free-text search term.
    pub search_term: Option<String>,
}

/// Failure of a single provider, scoped to that provider.
///
/// Never propagates to sibling providers or aborts an aggregate query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider {provider_id} failed: {message}")]
pub struct ProviderError {
    /// The provider that failed.
    pub provider_id: String,
    /// Human-readable failure description.
    pub message: String,
}

impl ProviderError {
    /// Creates a provider-scoped error.
    pub fn new(provider_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            message: message.into(),
        }
    }
}

/// One upstream pharmacy catalog.
pub trait ProductProvider: Send + Sync + 'static {
    /// Stable provider identifier, e.g. "dischem".
    fn id(&self) -> &str;

    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Run a catalog search against this provider.
    fn search(&self, params: &SearchParams)
        -> BoxFuture<'_, Result<Vec<ProductRecord>, ProviderError>>;
}

/// In-memory provider serving a fixed catalog.
///
/// Useful for tests and local development. Returns the whole catalog for
/// every query; relevance ordering is the aggregator's job, and unmatched
/// records simply rank last.
pub struct StaticCatalogProvider {
    id: String,
    name: String,
    records: Vec<ProductRecord>,
}

impl StaticCatalogProvider {
    /// Creates a provider over a fixed record list.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        records: Vec<ProductRecord>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            records,
        }
    }
}

impl ProductProvider for StaticCatalogProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn search(
        &self,
        _params: &SearchParams,
    ) -> BoxFuture<'_, Result<Vec<ProductRecord>, ProviderError>> {
        Box::pin(async move { Ok(self.records.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn record(name: &str, price: f64, provider_id: &str) -> ProductRecord {
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

    #[test]
    fn test_record_serde_uses_camel_case() {
        let json = serde_json::to_string(&record("Panado", 29.95, "dischem")).unwrap();
        assert!(json.contains("\"inStock\""));
        assert!(json.contains("\"providerId\""));
        assert!(!json.contains("generic_name"));
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new("clicks", "HTTP 502");
        assert_eq!(format!("{}", err), "provider clicks failed: HTTP 502");
    }

    #[tokio::test]
    async fn test_static_provider_serves_its_catalog() {
        let provider = StaticCatalogProvider::new(
            "dischem",
            "Dis-Chem",
            vec![
                record("Panado", 29.95, "dischem"),
                record("Allergex", 45.00, "dischem"),
            ],
        );
        assert_eq!(provider.id(), "dischem");
        assert_eq!(provider.name(), "Dis-Chem");

        let all = provider
            .search(&SearchParams {
                search_term: Some("panado".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2, "the catalog is returned whole; ranking filters");
    }
}
