//! JSON shapes of the domain types as exposed by the API.

use chrono::{DateTime, SecondsFormat, Utc};
use model::{
    Address, Category, Order, OrderItem, Payment, Product, User, WishlistItem, format_amount,
};
use serde::Serialize;
use serde_json::Value;

/// Catalog prices are always in the shop currency.
const CATALOG_CURRENCY: &str = "TRY";

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn iso_opt(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(iso)
}

#[derive(Debug, Serialize)]
pub struct UserResource {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
}

impl From<&User> for UserResource {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            email_verified: user.is_email_verified(),
        }
    }
}

/// The `me` payload, which adds timestamps to [`UserResource`].
#[derive(Debug, Serialize)]
pub struct ProfileResource {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub email_verified_at: Option<String>,
    pub created_at: String,
}

impl From<&User> for ProfileResource {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            email_verified: user.is_email_verified(),
            email_verified_at: iso_opt(user.email_verified_at),
            created_at: iso(user.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryResource {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub sort_order: i32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CategoryResource>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Category> for CategoryResource {
    fn from(category: &Category) -> Self {
        Self {
            id: category.id,
            name: category.name.clone(),
            slug: category.slug.clone(),
            description: category.description.clone(),
            parent_id: category.parent_id,
            sort_order: category.sort_order,
            is_active: category.is_active,
            children: category.children.iter().map(Self::from).collect(),
            created_at: iso(category.created_at),
            updated_at: iso(category.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PriceResource {
    pub amount: i64,
    pub formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct SeoResource {
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProductResource {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub slug: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: PriceResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_price: Option<PriceResource>,
    pub discount_percentage: Option<i64>,
    pub quantity: i32,
    pub in_stock: bool,
    pub is_low_stock: bool,
    pub is_active: bool,
    pub is_featured: bool,
    pub image: Option<String>,
    pub metadata: Option<Value>,
    pub seo: SeoResource,
    pub categories: Vec<CategoryResource>,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Product> for ProductResource {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            uuid: product.uuid.to_string(),
            name: product.name.clone(),
            slug: product.slug.clone(),
            sku: product.sku.clone(),
            description: product.description.clone(),
            price: PriceResource {
                amount: product.price,
                formatted: product.formatted_price(),
                currency: Some(CATALOG_CURRENCY),
            },
            compare_price: product.compare_price.map(|amount| PriceResource {
                amount,
                formatted: format_amount(amount, CATALOG_CURRENCY),
                currency: None,
            }),
            discount_percentage: product.discount_percentage(),
            quantity: product.quantity,
            in_stock: product.in_stock(),
            is_low_stock: product.is_low_stock(),
            is_active: product.is_active,
            is_featured: product.is_featured,
            image: product.primary_image(),
            metadata: product.metadata.clone(),
            seo: SeoResource {
                meta_title: product.meta_title.clone(),
                meta_description: product.meta_description.clone(),
            },
            categories: product.categories.iter().map(CategoryResource::from).collect(),
            published_at: iso_opt(product.published_at),
            created_at: iso(product.created_at),
            updated_at: iso(product.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderItemResource {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_sku: String,
    pub product_description: Option<String>,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub formatted_unit_price: String,
    pub formatted_total_price: String,
}

impl OrderItemResource {
    fn new(item: &OrderItem, currency: &str) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            product_sku: item.product_sku.clone(),
            product_description: item.product_description.clone(),
            product_image: item.product_image.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
            formatted_unit_price: format_amount(item.unit_price, currency),
            formatted_total_price: format_amount(item.total_price, currency),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderResource {
    pub id: i64,
    pub order_number: String,
    pub status: &'static str,
    pub status_label: &'static str,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub formatted_total: String,
    pub currency: String,
    pub payment_status: &'static str,
    pub paid_at: Option<String>,
    pub shipping: Address,
    pub billing: Address,
    pub notes: Option<String>,
    pub items: Vec<OrderItemResource>,
    pub items_count: usize,
    pub can_be_cancelled: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Order> for OrderResource {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status.as_str(),
            status_label: order.status.label(),
            subtotal: order.subtotal,
            tax_amount: order.tax_amount,
            shipping_amount: order.shipping_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            formatted_total: order.formatted_total(),
            currency: order.currency.clone(),
            payment_status: order.payment_status.as_str(),
            paid_at: iso_opt(order.paid_at),
            shipping: order.shipping.clone(),
            billing: order.billing.clone(),
            notes: order.notes.clone(),
            items: order
                .items
                .iter()
                .map(|item| OrderItemResource::new(item, &order.currency))
                .collect(),
            items_count: order.items.len(),
            can_be_cancelled: order.status.can_be_cancelled(),
            created_at: iso(order.created_at),
            updated_at: iso(order.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WishlistItemResource {
    pub id: i64,
    pub product_id: i64,
    pub product: Option<ProductResource>,
    pub added_at: String,
}

impl From<&WishlistItem> for WishlistItemResource {
    fn from(item: &WishlistItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product: item.product.as_ref().map(ProductResource::from),
            added_at: iso(item.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResource {
    pub merchant_oid: String,
    pub status: &'static str,
    pub status_label: &'static str,
    pub amount: i64,
    pub formatted_amount: String,
    pub currency: String,
    pub completed_at: Option<String>,
    pub order_id: Option<i64>,
}

impl From<&Payment> for PaymentStatusResource {
    fn from(payment: &Payment) -> Self {
        Self {
            merchant_oid: payment.merchant_oid.clone(),
            status: payment.status.as_str(),
            status_label: payment.status.label(),
            amount: payment.amount,
            formatted_amount: payment.formatted_amount(),
            currency: payment.currency.clone(),
            completed_at: iso_opt(payment.completed_at),
            order_id: payment.order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use service::testing::{sample_order, sample_product};

    #[test]
    fn test_product_resource_shape() {
        let mut product = sample_product(4, 15_000, 3);
        product.compare_price = Some(20_000);
        let value = serde_json::to_value(ProductResource::from(&product)).unwrap();

        assert_eq!(value["price"]["amount"], 15_000);
        assert_eq!(value["price"]["currency"], "TRY");
        assert_eq!(value["compare_price"]["amount"], 20_000);
        assert!(value["compare_price"].get("currency").is_none());
        assert_eq!(value["discount_percentage"], 25);
        assert_eq!(value["in_stock"], true);
        assert_eq!(value["seo"], json!({ "meta_title": null, "meta_description": null }));
    }

    #[test]
    fn test_product_without_compare_price_omits_it() {
        let product = sample_product(5, 1_000, 0);
        let value = serde_json::to_value(ProductResource::from(&product)).unwrap();
        assert!(value.get("compare_price").is_none());
        assert_eq!(value["in_stock"], false);
    }

    #[test]
    fn test_order_resource_counts_items() {
        let order = sample_order(8, 2);
        let value = serde_json::to_value(OrderResource::from(&order)).unwrap();

        assert_eq!(value["status"], "pending");
        assert_eq!(value["items_count"], 1);
        assert_eq!(value["can_be_cancelled"], true);
        assert_eq!(value["items"][0]["unit_price"], 10_000);
    }
}
