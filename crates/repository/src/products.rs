use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{NewProduct, Page, Product, ProductFilter};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row, Transaction};
use uuid::Uuid;

use crate::RepositoryError;
use crate::categories::category_from_row;

pub(crate) const PRODUCT_COLUMNS: &str = "id, uuid, name, slug, sku, description, price, \
     compare_price, cost, quantity, low_stock_threshold, is_active, is_featured, meta_title, \
     meta_description, metadata, published_at, created_at, updated_at";

/// # ProductsRepository
///
/// Catalog products. Soft-deleted rows are invisible to every read.
#[async_trait]
pub trait ProductsRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, RepositoryError>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError>;
    /// Products for the given ids, in no particular order. Missing ids are skipped.
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, RepositoryError>;
    async fn paginate(&self, filter: &ProductFilter) -> Result<Page<Product>, RepositoryError>;
    async fn sku_exists(&self, sku: &str, except_id: Option<i64>) -> Result<bool, RepositoryError>;
    async fn slug_exists(&self, slug: &str, except_id: Option<i64>)
    -> Result<bool, RepositoryError>;
    /// Inserts the product and links it to `categories` in one transaction.
    async fn create(
        &self,
        product: &NewProduct,
        categories: &[i64],
    ) -> Result<Product, RepositoryError>;
    /// Persists every column of `product`. Category links are replaced when given.
    async fn update(
        &self,
        product: &Product,
        categories: Option<&[i64]>,
    ) -> Result<Product, RepositoryError>;
    async fn soft_delete(&self, id: i64) -> Result<bool, RepositoryError>;
}

pub struct PgProductsRepository {
    pool: Pool,
}

impl PgProductsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductsRepository for PgProductsRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql =
            format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND deleted_at IS NULL");
        let Some(row) = client.query_opt(sql.as_str(), &[&id]).await? else {
            return Ok(None);
        };
        let mut products = vec![product_from_row(&row)];
        attach_categories(&client, &mut products).await?;
        Ok(products.pop())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE slug = $1 AND deleted_at IS NULL"
        );
        let Some(row) = client.query_opt(sql.as_str(), &[&slug]).await? else {
            return Ok(None);
        };
        let mut products = vec![product_from_row(&row)];
        attach_categories(&client, &mut products).await?;
        Ok(products.pop())
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, RepositoryError> {
        let client = self.pool.get().await?;
        fetch_by_ids(&client, ids).await
    }

    async fn paginate(&self, filter: &ProductFilter) -> Result<Page<Product>, RepositoryError> {
        let client = self.pool.get().await?;

        let mut clauses = vec!["deleted_at IS NULL".to_string()];
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

        if let Some(search) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            params.push(Box::new(format!("%{}%", escape_like(search))));
            let n = params.len();
            clauses.push(format!(
                "(name ILIKE ${n} OR sku ILIKE ${n} OR description ILIKE ${n})"
            ));
        }
        if let Some(active) = filter.is_active {
            params.push(Box::new(active));
            clauses.push(format!("is_active = ${}", params.len()));
        }
        if let Some(min) = filter.min_price {
            params.push(Box::new(min));
            clauses.push(format!("price >= ${}", params.len()));
        }
        if let Some(max) = filter.max_price {
            params.push(Box::new(max));
            clauses.push(format!("price <= ${}", params.len()));
        }
        if !filter.categories.is_empty() {
            params.push(Box::new(filter.categories.clone()));
            clauses.push(format!(
                "id IN (SELECT product_id FROM category_product WHERE category_id = ANY(${}))",
                params.len()
            ));
        }

        let where_sql = clauses.join(" AND ");
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let count_sql = format!("SELECT COUNT(*) FROM products WHERE {where_sql}");
        let total: i64 = client.query_one(count_sql.as_str(), &refs).await?.get(0);

        let page = filter.page;
        let list_sql = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE {where_sql}
             ORDER BY {column} {direction}, id {direction}
             LIMIT {limit} OFFSET {offset}",
            column = filter.sort_by.column(),
            direction = filter.sort_order.keyword(),
            limit = page.limit(),
            offset = page.offset(),
        );
        let rows = client.query(list_sql.as_str(), &refs).await?;

        let mut products: Vec<Product> = rows.iter().map(product_from_row).collect();
        attach_categories(&client, &mut products).await?;
        Ok(Page::new(products, total, page))
    }

    async fn sku_exists(&self, sku: &str, except_id: Option<i64>) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM products
                    WHERE sku = $1 AND deleted_at IS NULL AND ($2::BIGINT IS NULL OR id <> $2)
                )
                "#,
                &[&sku, &except_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn slug_exists(
        &self,
        slug: &str,
        except_id: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM products
                    WHERE slug = $1 AND deleted_at IS NULL AND ($2::BIGINT IS NULL OR id <> $2)
                )
                "#,
                &[&slug, &except_id],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn create(
        &self,
        product: &NewProduct,
        categories: &[i64],
    ) -> Result<Product, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                r#"
                INSERT INTO products (
                    uuid, name, slug, sku, description, price, compare_price, cost, quantity,
                    is_active, is_featured, meta_title, meta_description, metadata, published_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                        CASE WHEN $10 THEN now() END)
                RETURNING id
                "#,
                &[
                    &Uuid::new_v4(),
                    &product.name,
                    &product.slug,
                    &product.sku,
                    &product.description,
                    &product.price,
                    &product.compare_price,
                    &product.cost,
                    &product.quantity,
                    &product.is_active,
                    &product.is_featured,
                    &product.meta_title,
                    &product.meta_description,
                    &product.metadata,
                ],
            )
            .await?;
        let id: i64 = row.get("id");

        sync_categories(&tx, id, categories).await?;
        tx.commit().await?;

        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn update(
        &self,
        product: &Product,
        categories: Option<&[i64]>,
    ) -> Result<Product, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let updated = tx
            .execute(
                r#"
                UPDATE products SET
                    name = $2, slug = $3, sku = $4, description = $5, price = $6,
                    compare_price = $7, cost = $8, quantity = $9, is_active = $10,
                    is_featured = $11, meta_title = $12, meta_description = $13, metadata = $14,
                    published_at = COALESCE(published_at, CASE WHEN $10 THEN now() END),
                    updated_at = now()
                WHERE id = $1 AND deleted_at IS NULL
                "#,
                &[
                    &product.id,
                    &product.name,
                    &product.slug,
                    &product.sku,
                    &product.description,
                    &product.price,
                    &product.compare_price,
                    &product.cost,
                    &product.quantity,
                    &product.is_active,
                    &product.is_featured,
                    &product.meta_title,
                    &product.meta_description,
                    &product.metadata,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }

        if let Some(categories) = categories {
            sync_categories(&tx, product.id, categories).await?;
        }
        tx.commit().await?;

        self.find_by_id(product.id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn soft_delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "UPDATE products SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;
        Ok(deleted > 0)
    }
}

/// Replaces the category links of a product.
async fn sync_categories(
    tx: &Transaction<'_>,
    product_id: i64,
    categories: &[i64],
) -> Result<(), RepositoryError> {
    tx.execute(
        "DELETE FROM category_product WHERE product_id = $1",
        &[&product_id],
    )
    .await?;
    if !categories.is_empty() {
        tx.execute(
            r#"
            INSERT INTO category_product (category_id, product_id)
            SELECT DISTINCT unnest($2::BIGINT[]), $1::BIGINT
            "#,
            &[&product_id, &categories],
        )
        .await?;
    }
    Ok(())
}

pub(crate) async fn fetch_by_ids(
    client: &Client,
    ids: &[i64],
) -> Result<Vec<Product>, RepositoryError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ANY($1) AND deleted_at IS NULL"
    );
    let rows = client.query(sql.as_str(), &[&ids]).await?;
    let mut products: Vec<Product> = rows.iter().map(product_from_row).collect();
    attach_categories(client, &mut products).await?;
    Ok(products)
}

async fn attach_categories(
    client: &Client,
    products: &mut [Product],
) -> Result<(), RepositoryError> {
    let ids: Vec<i64> = products.iter().map(|p| p.id).collect();
    if ids.is_empty() {
        return Ok(());
    }

    let rows = client
        .query(
            r#"
            SELECT cp.product_id, c.id, c.name, c.slug, c.description, c.parent_id,
                   c.sort_order, c.is_active, c.created_at, c.updated_at
            FROM category_product cp
            JOIN categories c ON c.id = cp.category_id
            WHERE cp.product_id = ANY($1)
            ORDER BY c.sort_order, c.name
            "#,
            &[&ids],
        )
        .await?;

    let mut by_product: HashMap<i64, Vec<_>> = HashMap::new();
    for row in &rows {
        let product_id: i64 = row.get("product_id");
        by_product
            .entry(product_id)
            .or_default()
            .push(category_from_row(row));
    }
    for product in products.iter_mut() {
        product.categories = by_product.remove(&product.id).unwrap_or_default();
    }
    Ok(())
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub(crate) fn product_from_row(row: &Row) -> Product {
    Product {
        id: row.get("id"),
        uuid: row.get("uuid"),
        name: row.get("name"),
        slug: row.get("slug"),
        sku: row.get("sku"),
        description: row.get("description"),
        price: row.get("price"),
        compare_price: row.get("compare_price"),
        cost: row.get("cost"),
        quantity: row.get("quantity"),
        low_stock_threshold: row.get("low_stock_threshold"),
        is_active: row.get("is_active"),
        is_featured: row.get("is_featured"),
        meta_title: row.get("meta_title"),
        meta_description: row.get("meta_description"),
        metadata: row.get("metadata"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        categories: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn test_escape_like_wildcards() {
        assert_eq!(escape_like("100%_pure\\"), "100\\%\\_pure\\\\");
        assert_eq!(escape_like("kupa"), "kupa");
    }
}
