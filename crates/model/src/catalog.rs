use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::money::format_amount;
use crate::pagination::PageRequest;

/// Catalog category. `children` is only populated when requested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Category>,
}

/// Which level of the category tree a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CategoryParent {
    #[default]
    Any,
    Root,
    Id(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub slug: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: i64,
    pub compare_price: Option<i64>,
    pub cost: Option<i64>,
    pub quantity: i32,
    pub low_stock_threshold: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub metadata: Option<Value>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.quantity > 0
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity > 0 && self.quantity <= self.low_stock_threshold
    }

    /// Percentage saved against `compare_price`, rounded to the nearest integer.
    pub fn discount_percentage(&self) -> Option<i64> {
        match self.compare_price {
            Some(compare) if compare > self.price && compare > 0 => {
                let pct = (compare - self.price) as f64 / compare as f64 * 100.0;
                Some(pct.round() as i64)
            }
            _ => None,
        }
    }

    pub fn formatted_price(&self) -> String {
        format_amount(self.price, "TRY")
    }

    /// First entry of `metadata.images`, if any.
    pub fn primary_image(&self) -> Option<String> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("images"))
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn category_ids(&self) -> Vec<i64> {
        self.categories.iter().map(|c| c.id).collect()
    }
}

/// Insert payload for a product row.
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: i64,
    pub compare_price: Option<i64>,
    pub cost: Option<i64>,
    pub quantity: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub metadata: Option<Value>,
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub compare_price: Option<i64>,
    pub cost: Option<i64>,
    pub quantity: Option<i32>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub metadata: Option<Value>,
}

impl ProductChanges {
    pub fn apply(self, product: &mut Product) {
        if let Some(v) = self.name {
            product.name = v;
        }
        if let Some(v) = self.slug {
            product.slug = v;
        }
        if let Some(v) = self.sku {
            product.sku = v;
        }
        if let Some(v) = self.description {
            product.description = Some(v);
        }
        if let Some(v) = self.price {
            product.price = v;
        }
        if let Some(v) = self.compare_price {
            product.compare_price = Some(v);
        }
        if let Some(v) = self.cost {
            product.cost = Some(v);
        }
        if let Some(v) = self.quantity {
            product.quantity = v;
        }
        if let Some(v) = self.is_active {
            product.is_active = v;
        }
        if let Some(v) = self.is_featured {
            product.is_featured = v;
        }
        if let Some(v) = self.meta_title {
            product.meta_title = Some(v);
        }
        if let Some(v) = self.meta_description {
            product.meta_description = Some(v);
        }
        if let Some(v) = self.metadata {
            product.metadata = Some(v);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductSort {
    Name,
    Price,
    #[default]
    CreatedAt,
    Quantity,
}

impl ProductSort {
    /// Parses a `sort_by` value. Anything outside the whitelist sorts by creation date.
    pub fn parse(value: &str) -> Self {
        match value {
            "name" => Self::Name,
            "price" => Self::Price,
            "quantity" => Self::Quantity,
            _ => Self::CreatedAt,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Price => "price",
            Self::CreatedAt => "created_at",
            Self::Quantity => "quantity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub categories: Vec<i64>,
    pub sort_by: ProductSort,
    pub sort_order: SortOrder,
    pub page: PageRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(price: i64, compare: Option<i64>, quantity: i32) -> Product {
        let now = Utc::now();
        Product {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "Seramik Kupa".into(),
            slug: "seramik-kupa".into(),
            sku: "MUG-001".into(),
            description: None,
            price,
            compare_price: compare,
            cost: None,
            quantity,
            low_stock_threshold: 10,
            is_active: true,
            is_featured: false,
            meta_title: None,
            meta_description: None,
            metadata: Some(json!({ "images": ["https://cdn.example.com/mug.jpg"] })),
            published_at: None,
            created_at: now,
            updated_at: now,
            categories: vec![],
        }
    }

    #[test]
    fn test_discount_percentage() {
        assert_eq!(product(7_500, Some(10_000), 1).discount_percentage(), Some(25));
        assert_eq!(product(6_667, Some(10_000), 1).discount_percentage(), Some(33));
        assert_eq!(product(10_000, Some(10_000), 1).discount_percentage(), None);
        assert_eq!(product(10_000, None, 1).discount_percentage(), None);
    }

    #[test]
    fn test_stock_flags() {
        assert!(!product(100, None, 0).in_stock());
        assert!(product(100, None, 3).is_low_stock());
        assert!(!product(100, None, 11).is_low_stock());
    }

    #[test]
    fn test_primary_image() {
        let p = product(100, None, 1);
        assert_eq!(p.primary_image().as_deref(), Some("https://cdn.example.com/mug.jpg"));
    }

    #[test]
    fn test_changes_apply_only_present_fields() {
        let mut p = product(100, None, 1);
        ProductChanges {
            price: Some(250),
            quantity: Some(0),
            ..Default::default()
        }
        .apply(&mut p);

        assert_eq!(p.price, 250);
        assert_eq!(p.quantity, 0);
        assert_eq!(p.name, "Seramik Kupa");
    }

    #[test]
    fn test_sort_whitelist() {
        assert_eq!(ProductSort::parse("price"), ProductSort::Price);
        assert_eq!(ProductSort::parse("id; DROP TABLE products"), ProductSort::CreatedAt);
        assert_eq!(SortOrder::parse("ASC"), SortOrder::Asc);
        assert_eq!(SortOrder::parse("sideways"), SortOrder::Desc);
    }
}
