//! Request payloads and query strings accepted by the API.
//!
//! Amounts are integer minor units, the same as in responses.

use model::{
    Address, CategoryParent, NewProduct, PageRequest, ProductChanges, ProductFilter, ProductSort,
    SortOrder,
};
use serde::Deserialize;
use serde_json::Value;
use service::{OrderLine, PlaceOrder, RegisterInput};
use validator::{Validate, ValidationError};

const DEFAULT_COUNTRY: &str = "TR";

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "The name field is required and may not be greater than 255 characters."))]
    pub name: String,
    #[serde(default)]
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: String,
    #[serde(default)]
    #[validate(
        length(min = 8, message = "The password must be at least 8 characters."),
        must_match(other = "password_confirmation", message = "The password confirmation does not match.")
    )]
    pub password: String,
    #[serde(default)]
    pub password_confirmation: String,
}

impl From<RegisterRequest> for RegisterInput {
    fn from(req: RegisterRequest) -> Self {
        Self {
            name: req.name.trim().to_string(),
            email: req.email.trim().to_string(),
            password: req.password,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "The password field is required."))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResendVerificationRequest {
    #[serde(default)]
    #[validate(email(message = "The email must be a valid email address."))]
    pub email: String,
}

fn compare_price_not_below(price: i64, compare: Option<i64>) -> Result<(), ValidationError> {
    match compare {
        Some(compare) if compare < price => {
            let mut err = ValidationError::new("compare_price");
            err.message = Some("The compare price must be greater than or equal to price.".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

fn create_product_prices(req: &CreateProductRequest) -> Result<(), ValidationError> {
    compare_price_not_below(req.price, req.compare_price)
}

fn update_product_prices(req: &UpdateProductRequest) -> Result<(), ValidationError> {
    match req.price {
        Some(price) => compare_price_not_below(price, req.compare_price),
        None => Ok(()),
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "create_product_prices", skip_on_field_errors = false))]
pub struct CreateProductRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 255, message = "The name field is required and may not be greater than 255 characters."))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub slug: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "The sku field is required and may not be greater than 100 characters."))]
    pub sku: String,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    #[serde(default)]
    #[validate(range(min = 0, message = "The price must be at least 0."))]
    pub price: i64,
    #[validate(range(min = 0))]
    pub compare_price: Option<i64>,
    #[validate(range(min = 0))]
    pub cost: Option<i64>,
    #[serde(default)]
    #[validate(range(min = 0, message = "The quantity must be at least 0."))]
    pub quantity: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_featured: bool,
    #[validate(length(max = 255))]
    pub meta_title: Option<String>,
    #[validate(length(max = 500))]
    pub meta_description: Option<String>,
    pub metadata: Option<Value>,
    #[serde(default)]
    pub categories: Vec<i64>,
}

fn default_true() -> bool {
    true
}

impl CreateProductRequest {
    pub fn into_parts(self) -> (NewProduct, Vec<i64>) {
        let product = NewProduct {
            name: self.name.trim().to_string(),
            slug: self.slug.trim().to_string(),
            sku: self.sku.trim().to_string(),
            description: self.description,
            price: self.price,
            compare_price: self.compare_price,
            cost: self.cost,
            quantity: self.quantity,
            is_active: self.is_active,
            is_featured: self.is_featured,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            metadata: self.metadata,
        };
        (product, self.categories)
    }
}

/// Partial update: absent fields are left untouched.
#[derive(Debug, Default, Deserialize, Validate)]
#[validate(schema(function = "update_product_prices", skip_on_field_errors = false))]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub sku: Option<String>,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub price: Option<i64>,
    #[validate(range(min = 0))]
    pub compare_price: Option<i64>,
    #[validate(range(min = 0))]
    pub cost: Option<i64>,
    #[validate(range(min = 0))]
    pub quantity: Option<i32>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    #[validate(length(max = 255))]
    pub meta_title: Option<String>,
    #[validate(length(max = 500))]
    pub meta_description: Option<String>,
    pub metadata: Option<Value>,
    pub categories: Option<Vec<i64>>,
}

impl UpdateProductRequest {
    pub fn into_parts(self) -> (ProductChanges, Option<Vec<i64>>) {
        let changes = ProductChanges {
            name: self.name.map(|s| s.trim().to_string()),
            slug: self.slug.map(|s| s.trim().to_string()),
            sku: self.sku.map(|s| s.trim().to_string()),
            description: self.description,
            price: self.price,
            compare_price: self.compare_price,
            cost: self.cost,
            quantity: self.quantity,
            is_active: self.is_active,
            is_featured: self.is_featured,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            metadata: self.metadata,
        };
        (changes, self.categories)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct OrderItemRequest {
    pub product_id: i64,
    #[validate(range(min = 1, message = "The quantity must be at least 1."))]
    pub quantity: i32,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 100))]
    pub city: Option<String>,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(max = 20))]
    pub zip_code: Option<String>,
    #[validate(length(max = 100))]
    pub country: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<AddressRequest> for Address {
    fn from(req: AddressRequest) -> Self {
        let name = [non_blank(req.first_name), non_blank(req.last_name)]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        Address {
            name: Some(name).filter(|n| !n.is_empty()),
            phone: non_blank(req.phone),
            address: non_blank(req.address),
            city: non_blank(req.city),
            district: non_blank(req.state),
            postal_code: non_blank(req.zip_code),
            country: non_blank(req.country).unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
        }
    }
}

fn order_has_items(req: &CreateOrderRequest) -> Result<(), ValidationError> {
    if req.items.is_empty() {
        let mut err = ValidationError::new("items");
        err.message = Some("The items field must have at least 1 item.".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "order_has_items", skip_on_field_errors = false))]
pub struct CreateOrderRequest {
    #[serde(default)]
    #[validate]
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    #[validate]
    pub shipping_address: AddressRequest,
    #[validate]
    pub billing_address: Option<AddressRequest>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
}

impl CreateOrderRequest {
    pub fn into_order(self, user_id: i64) -> PlaceOrder {
        PlaceOrder {
            user_id,
            items: self
                .items
                .into_iter()
                .map(|item| OrderLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
            shipping: self.shipping_address.into(),
            billing: self.billing_address.map(Address::from),
            notes: non_blank(self.notes),
            currency: non_blank(self.currency).map(|c| c.to_ascii_uppercase()),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct InitiatePaymentRequest {
    pub order_id: i64,
    #[serde(default = "default_true")]
    pub terms_accepted: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WishlistRequest {
    #[validate(range(min = 1, message = "The selected product id is invalid."))]
    pub product_id: i64,
}

/// `?page=&per_page=`
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PageQuery {
    pub fn request(&self) -> PageRequest {
        PageRequest::new(self.page, self.per_page)
    }
}

/// Product listing query. Values arrive as strings and unparsable filters
/// are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub is_active: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    /// Comma separated category ids.
    pub categories: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ProductQuery {
    pub fn filter(&self) -> ProductFilter {
        ProductFilter {
            search: non_blank(self.search.clone()),
            is_active: self.is_active.as_deref().and_then(parse_bool),
            min_price: self.min_price.as_deref().and_then(|v| v.trim().parse().ok()),
            max_price: self.max_price.as_deref().and_then(|v| v.trim().parse().ok()),
            categories: self
                .categories
                .as_deref()
                .map(|list| {
                    list.split(',')
                        .filter_map(|id| id.trim().parse().ok())
                        .collect()
                })
                .unwrap_or_default(),
            sort_by: self
                .sort_by
                .as_deref()
                .map(ProductSort::parse)
                .unwrap_or_default(),
            sort_order: self
                .sort_order
                .as_deref()
                .map(SortOrder::parse)
                .unwrap_or_default(),
            page: PageRequest::new(self.page, self.per_page),
        }
    }
}

/// `?parent_id=null|{id}&with_children=`
#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    pub parent_id: Option<String>,
    pub with_children: Option<String>,
}

impl CategoryQuery {
    pub fn parent(&self) -> CategoryParent {
        match self.parent_id.as_deref().map(str::trim) {
            None | Some("") => CategoryParent::Any,
            Some("null") => CategoryParent::Root,
            Some(id) => id
                .parse()
                .map(CategoryParent::Id)
                .unwrap_or(CategoryParent::Any),
        }
    }

    pub fn with_children(&self) -> bool {
        self.with_children
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::field_errors;
    use serde_json::json;

    #[test]
    fn test_register_password_rules() {
        let req: RegisterRequest = serde_json::from_value(json!({
            "name": "Ayşe",
            "email": "not-an-email",
            "password": "kisa",
            "password_confirmation": "baska"
        }))
        .unwrap();
        let errors = field_errors(&req.validate().unwrap_err());

        assert!(errors.contains_key("email"));
        assert_eq!(errors["password"].len(), 2);
    }

    #[test]
    fn test_compare_price_below_price_is_rejected() {
        let req: CreateProductRequest = serde_json::from_value(json!({
            "name": "Kupa",
            "sku": "MUG-1",
            "price": 5000,
            "compare_price": 4000
        }))
        .unwrap();
        let errors = field_errors(&req.validate().unwrap_err());
        assert_eq!(
            errors["compare_price"],
            vec!["The compare price must be greater than or equal to price.".to_string()]
        );
    }

    #[test]
    fn test_order_request_validation_and_address_mapping() {
        let empty: CreateOrderRequest = serde_json::from_value(json!({ "items": [] })).unwrap();
        assert!(field_errors(&empty.validate().unwrap_err()).contains_key("items"));

        let req: CreateOrderRequest = serde_json::from_value(json!({
            "items": [{ "product_id": 3, "quantity": 2 }],
            "shipping_address": {
                "firstName": "Ayşe", "lastName": "Yılmaz", "address": "Bağdat Cd. 1",
                "city": "İstanbul", "state": "Kadıköy", "zipCode": "34710", "phone": "5551112233"
            },
            "notes": "  "
        }))
        .unwrap();
        req.validate().unwrap();

        let order = req.into_order(9);
        assert_eq!(order.user_id, 9);
        assert_eq!(order.items, vec![OrderLine { product_id: 3, quantity: 2 }]);
        assert_eq!(order.shipping.name.as_deref(), Some("Ayşe Yılmaz"));
        assert_eq!(order.shipping.district.as_deref(), Some("Kadıköy"));
        assert_eq!(order.shipping.postal_code.as_deref(), Some("34710"));
        assert_eq!(order.shipping.country, "TR");
        assert!(order.billing.is_none());
        assert!(order.notes.is_none());
        assert!(order.currency.is_none());
    }

    #[test]
    fn test_product_query_parsing() {
        let query = ProductQuery {
            search: Some("kupa".into()),
            is_active: Some("1".into()),
            min_price: Some("abc".into()),
            max_price: Some("20000".into()),
            categories: Some("1, 2,x".into()),
            sort_by: Some("price".into()),
            sort_order: Some("ASC".into()),
            page: Some(2),
            per_page: Some(500),
        };
        let filter = query.filter();
        assert_eq!(filter.is_active, Some(true));
        assert_eq!(filter.min_price, None);
        assert_eq!(filter.max_price, Some(20000));
        assert_eq!(filter.categories, vec![1, 2]);
        assert_eq!(filter.sort_by, ProductSort::Price);
        assert_eq!(filter.sort_order, SortOrder::Asc);
        assert_eq!(filter.page.per_page, 100);
    }

    #[test]
    fn test_category_parent_parsing() {
        let parent = |value: Option<&str>| CategoryQuery {
            parent_id: value.map(str::to_string),
            with_children: None,
        }
        .parent();
        assert_eq!(parent(None), CategoryParent::Any);
        assert_eq!(parent(Some("null")), CategoryParent::Root);
        assert_eq!(parent(Some("7")), CategoryParent::Id(7));
    }
}
