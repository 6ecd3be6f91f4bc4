use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{Category, CategoryParent};
use tokio_postgres::{Client, Row};

use crate::RepositoryError;

const CATEGORY_COLUMNS: &str =
    "id, name, slug, description, parent_id, sort_order, is_active, created_at, updated_at";

/// Read access to the category tree.
#[async_trait]
pub trait CategoriesRepository: Send + Sync {
    /// Active categories ordered by `sort_order` then name.
    async fn list_active(
        &self,
        parent: CategoryParent,
        with_children: bool,
    ) -> Result<Vec<Category>, RepositoryError>;
    async fn find_by_id(
        &self,
        id: i64,
        with_children: bool,
    ) -> Result<Option<Category>, RepositoryError>;
    /// Only active categories are addressable by slug.
    async fn find_by_slug(
        &self,
        slug: &str,
        with_children: bool,
    ) -> Result<Option<Category>, RepositoryError>;
    /// Returns the subset of `ids` that exist.
    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, RepositoryError>;
}

pub struct PgCategoriesRepository {
    pool: Pool,
}

impl PgCategoriesRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CategoriesRepository for PgCategoriesRepository {
    async fn list_active(
        &self,
        parent: CategoryParent,
        with_children: bool,
    ) -> Result<Vec<Category>, RepositoryError> {
        let client = self.pool.get().await?;
        let rows = match parent {
            CategoryParent::Any => {
                let sql = format!(
                    "SELECT {CATEGORY_COLUMNS} FROM categories
                     WHERE is_active ORDER BY sort_order, name"
                );
                client.query(sql.as_str(), &[]).await?
            }
            CategoryParent::Root => {
                let sql = format!(
                    "SELECT {CATEGORY_COLUMNS} FROM categories
                     WHERE is_active AND parent_id IS NULL ORDER BY sort_order, name"
                );
                client.query(sql.as_str(), &[]).await?
            }
            CategoryParent::Id(parent_id) => {
                let sql = format!(
                    "SELECT {CATEGORY_COLUMNS} FROM categories
                     WHERE is_active AND parent_id = $1 ORDER BY sort_order, name"
                );
                client.query(sql.as_str(), &[&parent_id]).await?
            }
        };

        let mut categories: Vec<Category> = rows.iter().map(category_from_row).collect();
        if with_children {
            attach_children(&client, &mut categories).await?;
        }
        Ok(categories)
    }

    async fn find_by_id(
        &self,
        id: i64,
        with_children: bool,
    ) -> Result<Option<Category>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1");
        let Some(row) = client.query_opt(sql.as_str(), &[&id]).await? else {
            return Ok(None);
        };

        let mut categories = vec![category_from_row(&row)];
        if with_children {
            attach_children(&client, &mut categories).await?;
        }
        Ok(categories.pop())
    }

    async fn find_by_slug(
        &self,
        slug: &str,
        with_children: bool,
    ) -> Result<Option<Category>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE slug = $1 AND is_active");
        let Some(row) = client.query_opt(sql.as_str(), &[&slug]).await? else {
            return Ok(None);
        };

        let mut categories = vec![category_from_row(&row)];
        if with_children {
            attach_children(&client, &mut categories).await?;
        }
        Ok(categories.pop())
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query("SELECT id FROM categories WHERE id = ANY($1)", &[&ids])
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

/// Loads the active direct children of every category in one query.
async fn attach_children(
    client: &Client,
    categories: &mut [Category],
) -> Result<(), RepositoryError> {
    let ids: Vec<i64> = categories.iter().map(|c| c.id).collect();
    if ids.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories
         WHERE is_active AND parent_id = ANY($1) ORDER BY sort_order, name"
    );
    let rows = client.query(sql.as_str(), &[&ids]).await?;

    let mut by_parent: HashMap<i64, Vec<Category>> = HashMap::new();
    for row in &rows {
        let child = category_from_row(row);
        if let Some(parent_id) = child.parent_id {
            by_parent.entry(parent_id).or_default().push(child);
        }
    }
    for category in categories.iter_mut() {
        category.children = by_parent.remove(&category.id).unwrap_or_default();
    }
    Ok(())
}

pub(crate) fn category_from_row(row: &Row) -> Category {
    Category {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        parent_id: row.get("parent_id"),
        sort_order: row.get("sort_order"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        children: Vec::new(),
    }
}
