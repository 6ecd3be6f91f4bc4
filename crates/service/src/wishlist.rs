use std::sync::Arc;

use model::{Page, PageRequest, WishlistItem};
use repository::{ProductsRepository, WishlistRepository};
use serde::Serialize;
use tracing::info;

use crate::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleResult {
    pub added: bool,
    pub in_wishlist: bool,
}

impl ToggleResult {
    pub fn message(&self) -> &'static str {
        if self.added {
            "Product added to wishlist"
        } else {
            "Product removed from wishlist"
        }
    }
}

pub struct WishlistService {
    wishlist: Arc<dyn WishlistRepository>,
    products: Arc<dyn ProductsRepository>,
}

impl WishlistService {
    pub fn new(
        wishlist: Arc<dyn WishlistRepository>,
        products: Arc<dyn ProductsRepository>,
    ) -> Self {
        Self { wishlist, products }
    }

    /// Adds an existing product. Adding twice returns the stored entry.
    pub async fn add(&self, user_id: i64, product_id: i64) -> Result<WishlistItem, ServiceError> {
        if self.products.find_by_id(product_id).await?.is_none() {
            return Err(ServiceError::ProductNotFound);
        }
        let item = self.wishlist.add(user_id, product_id).await?;
        info!(user_id, product_id, "Product added to wishlist");
        Ok(item)
    }

    pub async fn remove(&self, user_id: i64, product_id: i64) -> Result<bool, ServiceError> {
        let removed = self.wishlist.remove(user_id, product_id).await?;
        if removed {
            info!(user_id, product_id, "Product removed from wishlist");
        }
        Ok(removed)
    }

    pub async fn list(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<WishlistItem>, ServiceError> {
        Ok(self.wishlist.paginate(user_id, page).await?)
    }

    pub async fn all(&self, user_id: i64) -> Result<Vec<WishlistItem>, ServiceError> {
        Ok(self.wishlist.all(user_id).await?)
    }

    pub async fn contains(&self, user_id: i64, product_id: i64) -> Result<bool, ServiceError> {
        Ok(self.wishlist.contains(user_id, product_id).await?)
    }

    pub async fn count(&self, user_id: i64) -> Result<i64, ServiceError> {
        Ok(self.wishlist.count(user_id).await?)
    }

    pub async fn clear(&self, user_id: i64) -> Result<u64, ServiceError> {
        let removed = self.wishlist.clear(user_id).await?;
        info!(user_id, items_removed = removed, "Wishlist cleared");
        Ok(removed)
    }

    pub async fn toggle(
        &self,
        user_id: i64,
        product_id: i64,
    ) -> Result<ToggleResult, ServiceError> {
        let added = if self.contains(user_id, product_id).await? {
            self.remove(user_id, product_id).await?;
            false
        } else {
            self.add(user_id, product_id).await?;
            true
        };
        Ok(ToggleResult {
            added,
            in_wishlist: added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, sample_product};

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 5_000, 3));

        let first = h.wishlist().add(9, 1).await.unwrap();
        let second = h.wishlist().add(9, 1).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.wishlist().count(9).await.unwrap(), 1);
        assert!(first.product.is_some());
    }

    #[tokio::test]
    async fn test_add_unknown_product() {
        let h = Harness::new();
        assert!(matches!(
            h.wishlist().add(9, 404).await,
            Err(ServiceError::ProductNotFound)
        ));
    }

    #[tokio::test]
    async fn test_toggle_and_clear() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 5_000, 3));
        h.products_repo.insert(sample_product(2, 7_000, 3));
        let service = h.wishlist();

        let on = service.toggle(9, 1).await.unwrap();
        assert!(on.added && on.in_wishlist);
        let off = service.toggle(9, 1).await.unwrap();
        assert!(!off.added && !off.in_wishlist);
        assert_eq!(off.message(), "Product removed from wishlist");

        service.add(9, 1).await.unwrap();
        service.add(9, 2).await.unwrap();
        service.add(10, 2).await.unwrap();
        assert_eq!(service.list(9, PageRequest::default()).await.unwrap().total, 2);
        assert_eq!(service.clear(9).await.unwrap(), 2);
        assert!(!service.remove(9, 1).await.unwrap());
        assert_eq!(service.all(10).await.unwrap().len(), 1);
    }
}
