//! Cached product metadata.
//!
//! Feeds purchase initiation only. The cache's map is owned here and never
//! shared with the reconciler.

use entitlements_core::error::Result;
use entitlements_core::product::ProductMetadata;
use entitlements_core::product_id::ProductId;
use entitlements_core::source::ProductCatalog;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// How [`ProductCache::load`] treats already cached entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Fetch only the ids not cached yet
    #[default]
    UseCache,
    /// Fetch every requested id, replacing what is cached
    ForceRefresh,
}

/// Product metadata cache in front of a [`ProductCatalog`].
pub struct ProductCache {
    catalog: Arc<dyn ProductCatalog>,
    entries: RwLock<HashMap<ProductId, ProductMetadata>>,
}

impl ProductCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self {
            catalog,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Load metadata for `ids`.
    ///
    /// The result covers every requested id the catalog could resolve;
    /// unresolvable ids are absent, not an error. Duplicate ids collapse and an
    /// empty request returns without calling upstream.
    ///
    /// # Errors
    ///
    /// Returns a network-category [`EntitlementError`](entitlements_core::error::EntitlementError)
    /// when the fetch fails. The cache is left untouched in that case.
    #[tracing::instrument(skip(self, ids), name = "product_cache_load")]
    pub async fn load<I>(&self, ids: I, policy: CachePolicy) -> Result<HashMap<ProductId, ProductMetadata>>
    where
        I: IntoIterator<Item = ProductId>,
    {
        let requested: BTreeSet<ProductId> = ids.into_iter().collect();
        if requested.is_empty() {
            return Ok(HashMap::new());
        }

        let to_fetch: Vec<ProductId> = match policy {
            CachePolicy::UseCache => {
                let entries = self.entries.read();
                requested
                    .iter()
                    .filter(|id| !entries.contains_key(*id))
                    .cloned()
                    .collect()
            },
            CachePolicy::ForceRefresh => requested.iter().cloned().collect(),
        };

        if to_fetch.is_empty() {
            metrics::counter!("entitlements.product_cache.hits").increment(requested.len() as u64);
        } else {
            let fetched = self.fetch(to_fetch.clone()).await?;
            let mut entries = self.entries.write();

            if policy == CachePolicy::ForceRefresh {
                for id in &to_fetch {
                    entries.remove(id);
                }
            }
            for product in fetched {
                if requested.contains(&product.id) {
                    entries.insert(product.id.clone(), product);
                }
            }

            metrics::counter!("entitlements.product_cache.hits")
                .increment((requested.len() - to_fetch.len()) as u64);
            metrics::counter!("entitlements.product_cache.misses").increment(to_fetch.len() as u64);
        }

        let entries = self.entries.read();
        Ok(requested
            .iter()
            .filter_map(|id| entries.get(id).map(|product| (id.clone(), product.clone())))
            .collect())
    }

    async fn fetch(&self, ids: Vec<ProductId>) -> Result<Vec<ProductMetadata>> {
        let requested = ids.len();
        match self.catalog.fetch_metadata(ids).await {
            Ok(products) => {
                tracing::debug!(requested, resolved = products.len(), "Fetched product metadata");
                Ok(products)
            },
            Err(error) => {
                let error = error.into_network_category();
                tracing::warn!(requested, error = %error, "Product metadata fetch failed");
                metrics::counter!("entitlements.product_cache.fetch_failures").increment(1);
                Err(error)
            },
        }
    }

    /// Cached metadata for one product
    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<ProductMetadata> {
        self.entries.read().get(id).cloned()
    }

    /// Number of cached products
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.entries.write().clear();
        tracing::debug!("Cleared product cache");
    }
}

impl std::fmt::Debug for ProductCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use entitlements_core::error::EntitlementError;
    use entitlements_testing::mocks::MockProductCatalog;

    fn product(id: &str, price: &str) -> ProductMetadata {
        ProductMetadata::new(id, id.to_uppercase()).with_price(price, 4_990_000, "USD")
    }

    fn ids(raw: &[&str]) -> Vec<ProductId> {
        raw.iter().map(|id| ProductId::new(*id)).collect()
    }

    fn setup(products: Vec<ProductMetadata>) -> (Arc<MockProductCatalog>, ProductCache) {
        let catalog = Arc::new(MockProductCatalog::new(products));
        let cache = ProductCache::new(Arc::clone(&catalog) as Arc<dyn ProductCatalog>);
        (catalog, cache)
    }

    #[tokio::test]
    async fn test_use_cache_fetches_only_missing() {
        let (catalog, cache) = setup(vec![product("a", "$1"), product("b", "$2")]);

        cache.load(ids(&["a"]), CachePolicy::UseCache).await.unwrap();
        let loaded = cache.load(ids(&["a", "b"]), CachePolicy::UseCache).await.unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(catalog.requests(), vec![ids(&["a"]), ids(&["b"])]);
    }

    #[tokio::test]
    async fn test_fully_cached_request_skips_upstream() {
        let (catalog, cache) = setup(vec![product("a", "$1")]);

        cache.load(ids(&["a"]), CachePolicy::UseCache).await.unwrap();
        cache.load(ids(&["a", "a"]), CachePolicy::UseCache).await.unwrap();
        cache.load(Vec::new(), CachePolicy::ForceRefresh).await.unwrap();

        assert_eq!(catalog.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_ids_are_absent() {
        let (_, cache) = setup(vec![product("a", "$1")]);

        let loaded = cache.load(ids(&["a", "ghost"]), CachePolicy::UseCache).await.unwrap();

        assert!(loaded.contains_key(&ProductId::new("a")));
        assert!(!loaded.contains_key(&ProductId::new("ghost")));
        assert!(cache.get(&ProductId::new("ghost")).is_none());
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_and_evicts() {
        let (catalog, cache) = setup(vec![product("a", "$1"), product("b", "$2")]);
        cache.load(ids(&["a", "b"]), CachePolicy::UseCache).await.unwrap();

        catalog.insert(product("a", "$9"));
        catalog.remove(&ProductId::new("b"));
        let loaded = cache.load(ids(&["a", "b"]), CachePolicy::ForceRefresh).await.unwrap();

        assert_eq!(loaded[&ProductId::new("a")].display_price, "$9");
        assert!(cache.get(&ProductId::new("b")).is_none());
        assert_eq!(catalog.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_untouched() {
        let (catalog, cache) = setup(vec![product("a", "$1")]);
        cache.load(ids(&["a"]), CachePolicy::UseCache).await.unwrap();

        catalog.fail_with(EntitlementError::Unknown("socket closed".into()));
        let error = cache.load(ids(&["a"]), CachePolicy::ForceRefresh).await.unwrap_err();

        assert_eq!(error, EntitlementError::NetworkUnavailable);
        assert_eq!(cache.get(&ProductId::new("a")).unwrap().display_price, "$1");
    }

    #[tokio::test]
    async fn test_store_unavailable_is_kept() {
        let (catalog, cache) = setup(Vec::new());
        catalog.fail_with(EntitlementError::StoreUnavailable);

        let error = cache.load(ids(&["a"]), CachePolicy::UseCache).await.unwrap_err();
        assert_eq!(error, EntitlementError::StoreUnavailable);
    }

    #[tokio::test]
    async fn test_clear() {
        let (_, cache) = setup(vec![product("a", "$1")]);
        cache.load(ids(&["a"]), CachePolicy::UseCache).await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
