use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{Page, PageRequest, WishlistItem};
use tokio_postgres::{Client, Row};

use crate::RepositoryError;
use crate::products::fetch_by_ids;

/// Saved products per user. A product appears at most once per user.
#[async_trait]
pub trait WishlistRepository: Send + Sync {
    /// Adds the product, returning the existing entry when already present.
    async fn add(&self, user_id: i64, product_id: i64) -> Result<WishlistItem, RepositoryError>;
    async fn remove(&self, user_id: i64, product_id: i64) -> Result<bool, RepositoryError>;
    async fn contains(&self, user_id: i64, product_id: i64) -> Result<bool, RepositoryError>;
    async fn count(&self, user_id: i64) -> Result<i64, RepositoryError>;
    async fn clear(&self, user_id: i64) -> Result<u64, RepositoryError>;
    /// Newest first, with the product loaded.
    async fn paginate(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<WishlistItem>, RepositoryError>;
    async fn all(&self, user_id: i64) -> Result<Vec<WishlistItem>, RepositoryError>;
}

pub struct PgWishlistRepository {
    pool: Pool,
}

impl PgWishlistRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WishlistRepository for PgWishlistRepository {
    async fn add(&self, user_id: i64, product_id: i64) -> Result<WishlistItem, RepositoryError> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO wishlists (user_id, product_id) VALUES ($1, $2)
                ON CONFLICT (user_id, product_id) DO NOTHING
                "#,
                &[&user_id, &product_id],
            )
            .await?;
        let row = client
            .query_one(
                r#"
                SELECT id, user_id, product_id, created_at FROM wishlists
                WHERE user_id = $1 AND product_id = $2
                "#,
                &[&user_id, &product_id],
            )
            .await?;

        let mut items = vec![item_from_row(&row)];
        attach_products(&client, &mut items).await?;
        items.pop().ok_or(RepositoryError::NotFound)
    }

    async fn remove(&self, user_id: i64, product_id: i64) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM wishlists WHERE user_id = $1 AND product_id = $2",
                &[&user_id, &product_id],
            )
            .await?;
        Ok(removed > 0)
    }

    async fn contains(&self, user_id: i64, product_id: i64) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM wishlists WHERE user_id = $1 AND product_id = $2)",
                &[&user_id, &product_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn count(&self, user_id: i64) -> Result<i64, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM wishlists WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(row.get(0))
    }

    async fn clear(&self, user_id: i64) -> Result<u64, RepositoryError> {
        let client = self.pool.get().await?;
        let removed = client
            .execute("DELETE FROM wishlists WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(removed)
    }

    async fn paginate(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<WishlistItem>, RepositoryError> {
        let client = self.pool.get().await?;
        let total: i64 = client
            .query_one("SELECT COUNT(*) FROM wishlists WHERE user_id = $1", &[&user_id])
            .await?
            .get(0);
        let rows = client
            .query(
                r#"
                SELECT id, user_id, product_id, created_at FROM wishlists
                WHERE user_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2 OFFSET $3
                "#,
                &[&user_id, &page.limit(), &page.offset()],
            )
            .await?;

        let mut items: Vec<WishlistItem> = rows.iter().map(item_from_row).collect();
        attach_products(&client, &mut items).await?;
        Ok(Page::new(items, total, page))
    }

    async fn all(&self, user_id: i64) -> Result<Vec<WishlistItem>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT id, user_id, product_id, created_at FROM wishlists
                WHERE user_id = $1 ORDER BY created_at DESC, id DESC
                "#,
                &[&user_id],
            )
            .await?;
        let mut items: Vec<WishlistItem> = rows.iter().map(item_from_row).collect();
        attach_products(&client, &mut items).await?;
        Ok(items)
    }
}

async fn attach_products(
    client: &Client,
    items: &mut [WishlistItem],
) -> Result<(), RepositoryError> {
    let ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
    let mut products: HashMap<i64, _> = fetch_by_ids(client, &ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    for item in items.iter_mut() {
        item.product = products.remove(&item.product_id);
    }
    Ok(())
}

fn item_from_row(row: &Row) -> WishlistItem {
    WishlistItem {
        id: row.get("id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        created_at: row.get("created_at"),
        product: None,
    }
}
