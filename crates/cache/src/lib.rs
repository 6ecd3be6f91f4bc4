//! In-process cache for catalog reads, with thread-safe access and
//! per-entry expiry.
//!
//! Products are cached by id and active category listings by the
//! `(parent, with_children)` pair they were requested with. Writes go
//! through the database and invalidate the affected entries.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use model::{Category, CategoryParent, Product};
use tokio::sync::RwLock;

/// Thread-safe map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: Arc<RwLock<HashMap<K, (V, Instant)>>>,
    ttl: Duration,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            ttl: self.ttl,
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Returns a clone of the value unless it is missing or expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().await;
        map.get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone())
    }

    /// Inserts or replaces a value, restarting its lifetime.
    pub async fn insert(&self, key: K, value: V) {
        let mut map = self.inner.write().await;
        map.insert(key, (value, Instant::now() + self.ttl));
    }

    pub async fn invalidate(&self, key: &K) -> bool {
        let mut map = self.inner.write().await;
        map.remove(key).is_some()
    }

    /// Drops expired entries and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, (_, expires_at)| *expires_at > now);
        before - map.len()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Catalog read cache shared by the product and category services.
#[derive(Debug, Clone)]
pub struct CatalogCache {
    products: TtlCache<i64, Product>,
    categories: TtlCache<(CategoryParent, bool), Vec<Category>>,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            products: TtlCache::new(ttl),
            categories: TtlCache::new(ttl),
        }
    }

    pub async fn product(&self, id: i64) -> Option<Product> {
        self.products.get(&id).await
    }

    pub async fn set_product(&self, product: Product) {
        self.products.insert(product.id, product).await;
    }

    pub async fn invalidate_product(&self, id: i64) {
        self.products.invalidate(&id).await;
    }

    pub async fn categories(
        &self,
        parent: CategoryParent,
        with_children: bool,
    ) -> Option<Vec<Category>> {
        self.categories.get(&(parent, with_children)).await
    }

    pub async fn set_categories(
        &self,
        parent: CategoryParent,
        with_children: bool,
        categories: Vec<Category>,
    ) {
        self.categories
            .insert((parent, with_children), categories)
            .await;
    }

    pub async fn invalidate_categories(&self) {
        self.categories.clear().await;
    }

    /// Removes expired entries from both maps.
    pub async fn purge_expired(&self) -> usize {
        self.products.purge_expired().await + self.categories.purge_expired().await
    }

    /// Number of live entries, used by the detailed health check.
    pub async fn entries(&self) -> usize {
        self.products.len().await + self.categories.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_product(id: i64) -> Product {
        let now = Utc::now();
        Product {
            id,
            uuid: Uuid::new_v4(),
            name: "Bambu Kesme Tahtası".to_string(),
            slug: format!("bambu-kesme-tahtasi-{id}"),
            sku: format!("BMB-{id:03}"),
            description: None,
            price: 24_990,
            compare_price: None,
            cost: None,
            quantity: 12,
            low_stock_threshold: 10,
            is_active: true,
            is_featured: false,
            meta_title: None,
            meta_description: None,
            metadata: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            categories: vec![],
        }
    }

    #[tokio::test]
    async fn test_empty_cache() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        assert!(cache.product(1).await.is_none());
        assert!(cache.categories(CategoryParent::Root, false).await.is_none());
    }

    #[tokio::test]
    async fn test_set_and_get_product() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        cache.set_product(sample_product(7)).await;

        let got = cache.product(7).await;
        assert_eq!(got.map(|p| p.sku), Some("BMB-007".to_string()));
    }

    #[tokio::test]
    async fn test_invalidate_product() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        cache.set_product(sample_product(3)).await;
        cache.invalidate_product(3).await;
        assert!(cache.product(3).await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(20));
        cache.insert("a", 1).await;
        assert_eq!(cache.get(&"a").await, Some(1));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"a").await, None);
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_category_lists_keyed_by_request() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        cache.set_categories(CategoryParent::Root, true, vec![]).await;

        assert_eq!(cache.categories(CategoryParent::Root, true).await, Some(vec![]));
        assert!(cache.categories(CategoryParent::Root, false).await.is_none());

        cache.invalidate_categories().await;
        assert!(cache.categories(CategoryParent::Root, true).await.is_none());
    }
}
