//! Product and category use cases.

use std::sync::Arc;

use cache::CatalogCache;
use model::{
    Category, CategoryParent, DomainEvent, NewProduct, Page, Product, ProductChanges,
    ProductFilter,
};
use repository::{CategoriesRepository, ProductsRepository};
use tracing::{info, instrument};

use crate::ServiceError;
use crate::audit::{AuditLogger, Auditable, changed_values};
use crate::events::{self, EventPublisher};

pub struct ProductService {
    products: Arc<dyn ProductsRepository>,
    categories: Arc<dyn CategoriesRepository>,
    cache: CatalogCache,
    audit: AuditLogger,
    events: Arc<dyn EventPublisher>,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductsRepository>,
        categories: Arc<dyn CategoriesRepository>,
        cache: CatalogCache,
        audit: AuditLogger,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            products,
            categories,
            cache,
            audit,
            events,
        }
    }

    pub async fn list(&self, filter: &ProductFilter) -> Result<Page<Product>, ServiceError> {
        Ok(self.products.paginate(filter).await?)
    }

    /// Cache-first lookup by id.
    pub async fn get(&self, id: i64) -> Result<Product, ServiceError> {
        if let Some(product) = self.cache.product(id).await {
            return Ok(product);
        }
        let product = self
            .products
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::ProductNotFound)?;
        self.cache.set_product(product.clone()).await;
        Ok(product)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Product, ServiceError> {
        self.products
            .find_by_slug(slug)
            .await?
            .ok_or(ServiceError::ProductNotFound)
    }

    /// Creates a product. An empty slug is derived from the name.
    #[instrument(skip(self, input, categories), fields(sku = %input.sku))]
    pub async fn create(
        &self,
        mut input: NewProduct,
        categories: Vec<i64>,
    ) -> Result<Product, ServiceError> {
        if input.slug.trim().is_empty() {
            input.slug = slugify(&input.name);
        }
        if self.products.sku_exists(&input.sku, None).await? {
            return Err(ServiceError::DuplicateSku);
        }
        if self.products.slug_exists(&input.slug, None).await? {
            return Err(ServiceError::DuplicateSlug);
        }
        self.ensure_categories_exist(&categories).await?;

        let product = self.products.create(&input, &categories).await?;

        self.audit.created(&product).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::ProductCreated {
                product_id: product.id,
                sku: product.sku.clone(),
            },
        )
        .await;
        self.cache.invalidate_product(product.id).await;
        info!(product_id = product.id, "Product created");
        Ok(product)
    }

    /// Applies the provided fields. Category links are replaced only when
    /// `categories` is given.
    #[instrument(skip(self, changes, categories))]
    pub async fn update(
        &self,
        id: i64,
        changes: ProductChanges,
        categories: Option<Vec<i64>>,
    ) -> Result<Product, ServiceError> {
        let before = self
            .products
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::ProductNotFound)?;

        if let Some(sku) = changes.sku.as_deref() {
            if sku != before.sku && self.products.sku_exists(sku, Some(id)).await? {
                return Err(ServiceError::DuplicateSku);
            }
        }
        if let Some(slug) = changes.slug.as_deref() {
            if slug != before.slug && self.products.slug_exists(slug, Some(id)).await? {
                return Err(ServiceError::DuplicateSlug);
            }
        }
        if let Some(ids) = categories.as_deref() {
            self.ensure_categories_exist(ids).await?;
        }

        let mut product = before.clone();
        changes.apply(&mut product);
        let after = self.products.update(&product, categories.as_deref()).await?;

        let (_, new) = changed_values(&before.audit_attributes(), &after.audit_attributes());
        let mut changed: Vec<String> = new.keys().cloned().collect();
        if categories.is_some() && sorted(before.category_ids()) != sorted(after.category_ids()) {
            changed.push("categories".to_string());
        }

        self.audit.updated(&before, &after).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::ProductUpdated {
                product_id: after.id,
                changed,
            },
        )
        .await;
        self.cache.invalidate_product(id).await;
        Ok(after)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let product = self
            .products
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::ProductNotFound)?;
        if !self.products.soft_delete(id).await? {
            return Err(ServiceError::ProductNotFound);
        }

        self.audit.deleted(&product).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::ProductDeleted {
                product_id: product.id,
                uuid: product.uuid,
                sku: product.sku.clone(),
            },
        )
        .await;
        self.cache.invalidate_product(id).await;
        info!(product_id = id, "Product deleted");
        Ok(())
    }

    async fn ensure_categories_exist(&self, ids: &[i64]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let existing = self.categories.existing_ids(ids).await?;
        if ids.iter().any(|id| !existing.contains(id)) {
            return Err(ServiceError::invalid(
                "categories",
                "The selected categories is invalid.",
            ));
        }
        Ok(())
    }
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids
}

/// URL slug of a product name, with Turkish letters transliterated.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars().flat_map(char::to_lowercase) {
        let mapped = match ch {
            // combining dot left behind by lowercasing 'İ'
            '\u{307}' => continue,
            'ç' => 'c',
            'ğ' => 'g',
            'ı' | 'i' | 'î' => 'i',
            'ö' => 'o',
            'ş' => 's',
            'ü' | 'û' => 'u',
            'â' => 'a',
            c if c.is_ascii_alphanumeric() => c,
            _ => '-',
        };
        if mapped == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(mapped);
    }
    slug.trim_end_matches('-').to_string()
}

pub struct CategoryService {
    categories: Arc<dyn CategoriesRepository>,
    cache: CatalogCache,
}

impl CategoryService {
    pub fn new(categories: Arc<dyn CategoriesRepository>, cache: CatalogCache) -> Self {
        Self { categories, cache }
    }

    /// Active categories below `parent`, cached per request shape.
    pub async fn list_active(
        &self,
        parent: CategoryParent,
        with_children: bool,
    ) -> Result<Vec<Category>, ServiceError> {
        if let Some(hit) = self.cache.categories(parent, with_children).await {
            return Ok(hit);
        }
        let categories = self.categories.list_active(parent, with_children).await?;
        self.cache
            .set_categories(parent, with_children, categories.clone())
            .await;
        Ok(categories)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Category, ServiceError> {
        self.categories
            .find_by_id(id, true)
            .await?
            .filter(|c| c.is_active)
            .ok_or(ServiceError::CategoryNotFound)
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Category, ServiceError> {
        self.categories
            .find_by_slug(slug, true)
            .await?
            .ok_or(ServiceError::CategoryNotFound)
    }

    pub async fn roots(&self, with_children: bool) -> Result<Vec<Category>, ServiceError> {
        self.list_active(CategoryParent::Root, with_children).await
    }

    pub async fn children(&self, parent_id: i64) -> Result<Vec<Category>, ServiceError> {
        self.list_active(CategoryParent::Id(parent_id), false).await
    }
}
