//! Checkout and order lifecycle.
//!
//! [`OrderService`] is a trait because the payment flow depends on it and is
//! tested against it independently.

use std::sync::Arc;

use app_config::ShopSettings;
use async_trait::async_trait;
use cache::CatalogCache;
use chrono::Utc;
use model::{
    Address, DomainEvent, NewOrder, NewOrderItem, Order, OrderStatus, Page, PageRequest, Product,
};
use rand::Rng;
use rand::distributions::Alphanumeric;
use repository::{OrdersRepository, ProductsRepository, RepositoryError};
use tracing::{info, instrument, warn};

use crate::ServiceError;
use crate::audit::AuditLogger;
use crate::events::{self, EventPublisher};

pub const DEFAULT_RECENT_ORDERS: usize = 5;

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub user_id: i64,
    pub items: Vec<OrderLine>,
    pub shipping: Address,
    /// Missing fields fall back to the shipping address.
    pub billing: Option<Address>,
    pub notes: Option<String>,
    /// Defaults to the shop currency.
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
}

/// Tax, shipping and grand total for a subtotal in minor units.
pub fn calculate_totals(subtotal: i64, shop: &ShopSettings) -> Totals {
    let tax_amount = (subtotal as f64 * shop.tax_rate).round() as i64;
    let shipping_amount = if subtotal >= shop.free_shipping_threshold {
        0
    } else {
        shop.default_shipping_cost
    };
    Totals {
        subtotal,
        tax_amount,
        shipping_amount,
        discount_amount: 0,
        total_amount: subtotal + tax_amount + shipping_amount,
    }
}

/// `{prefix}-{random upper alphanumerics}-{unix seconds}`.
pub fn generate_order_number(shop: &ShopSettings) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(shop.order_number_length)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("{}-{}-{}", shop.order_prefix, random, Utc::now().timestamp())
}

/// Sums quantities of repeated products, keeping first-seen order.
fn merge_lines(lines: &[OrderLine]) -> Vec<OrderLine> {
    let mut merged: Vec<OrderLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged.iter_mut().find(|l| l.product_id == line.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(*line),
        }
    }
    merged
}

fn snapshot(product: &Product, quantity: i32) -> NewOrderItem {
    NewOrderItem {
        product_id: product.id,
        product_name: product.name.clone(),
        product_sku: product.sku.clone(),
        product_description: product.description.clone(),
        product_image: product.primary_image(),
        quantity,
        unit_price: product.price,
        total_price: product.price * i64::from(quantity),
    }
}

#[async_trait]
pub trait OrderService: Send + Sync {
    /// Converts cart lines into a pending order, reserving stock.
    async fn create_order(&self, input: PlaceOrder) -> Result<Order, ServiceError>;
    async fn find_by_id(&self, id: i64) -> Result<Order, ServiceError>;
    async fn find_by_order_number(&self, number: &str) -> Result<Order, ServiceError>;
    async fn user_orders(&self, user_id: i64, page: PageRequest)
    -> Result<Page<Order>, ServiceError>;
    async fn recent_orders(&self, user_id: i64, limit: usize) -> Result<Vec<Order>, ServiceError>;
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, ServiceError>;
    async fn mark_as_paid(&self, id: i64) -> Result<Order, ServiceError>;
    /// Cancels a pending or processing order and restores its stock.
    async fn cancel_order(&self, id: i64) -> Result<Order, ServiceError>;
}

pub struct OrderServiceImpl {
    orders: Arc<dyn OrdersRepository>,
    products: Arc<dyn ProductsRepository>,
    cache: CatalogCache,
    audit: AuditLogger,
    events: Arc<dyn EventPublisher>,
    shop: ShopSettings,
}

impl OrderServiceImpl {
    pub fn new(
        orders: Arc<dyn OrdersRepository>,
        products: Arc<dyn ProductsRepository>,
        cache: CatalogCache,
        audit: AuditLogger,
        events: Arc<dyn EventPublisher>,
        shop: ShopSettings,
    ) -> Self {
        Self {
            orders,
            products,
            cache,
            audit,
            events,
            shop,
        }
    }

    /// Drops cached products whose stock the order just moved.
    async fn invalidate_stock(&self, order: &Order) {
        for item in &order.items {
            self.cache.invalidate_product(item.product_id).await;
        }
    }
}

#[async_trait]
impl OrderService for OrderServiceImpl {
    #[instrument(skip(self, input), fields(user_id = input.user_id))]
    async fn create_order(&self, input: PlaceOrder) -> Result<Order, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let lines = merge_lines(&input.items);
        let ids: Vec<i64> = lines.iter().map(|l| l.product_id).collect();
        let products = self.products.find_by_ids(&ids).await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let Some(product) = products.iter().find(|p| p.id == line.product_id) else {
                warn!(product_id = line.product_id, "Skipping unknown product");
                continue;
            };
            if product.quantity < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    product_id: product.id,
                    name: product.name.clone(),
                    requested: line.quantity,
                    available: product.quantity,
                });
            }
            items.push(snapshot(product, line.quantity));
        }
        if items.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let subtotal = items.iter().map(|i| i.total_price).sum();
        let totals = calculate_totals(subtotal, &self.shop);
        let billing = input
            .billing
            .unwrap_or_default()
            .or_else(&input.shipping);
        let new_order = NewOrder {
            user_id: input.user_id,
            order_number: generate_order_number(&self.shop),
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            shipping_amount: totals.shipping_amount,
            discount_amount: totals.discount_amount,
            total_amount: totals.total_amount,
            currency: input.currency.unwrap_or_else(|| self.shop.currency.clone()),
            shipping: input.shipping,
            billing,
            notes: input.notes,
        };

        let order = match self.orders.create_with_items(&new_order, &items).await {
            Ok(order) => order,
            // stock moved between the check above and the decrement
            Err(RepositoryError::InsufficientStock {
                product_id,
                available,
            }) => {
                let line = items.iter().find(|i| i.product_id == product_id);
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    name: line.map(|i| i.product_name.clone()).unwrap_or_default(),
                    requested: line.map(|i| i.quantity).unwrap_or_default(),
                    available,
                });
            }
            Err(err) => return Err(err.into()),
        };
        self.invalidate_stock(&order).await;

        self.audit.created(&order).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::OrderPlaced {
                order_id: order.id,
                order_number: order.order_number.clone(),
                user_id: order.user_id,
                total_amount: order.total_amount,
            },
        )
        .await;
        info!(
            order_id = order.id,
            order_number = %order.order_number,
            total_amount = order.total_amount,
            "Order created"
        );
        Ok(order)
    }

    async fn find_by_id(&self, id: i64) -> Result<Order, ServiceError> {
        self.orders
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::OrderNotFound)
    }

    async fn find_by_order_number(&self, number: &str) -> Result<Order, ServiceError> {
        self.orders
            .find_by_order_number(number)
            .await?
            .ok_or(ServiceError::OrderNotFound)
    }

    async fn user_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<Order>, ServiceError> {
        Ok(self.orders.paginate_for_user(user_id, page).await?)
    }

    async fn recent_orders(&self, user_id: i64, limit: usize) -> Result<Vec<Order>, ServiceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(self.orders.recent_for_user(user_id, limit).await?)
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, ServiceError> {
        let before = self.find_by_id(id).await?;
        let after = self.orders.update_status(id, status).await?;
        self.audit.updated(&before, &after).await;
        Ok(after)
    }

    #[instrument(skip(self))]
    async fn mark_as_paid(&self, id: i64) -> Result<Order, ServiceError> {
        let before = self.find_by_id(id).await?;
        let after = self.orders.mark_paid(id).await?;
        self.audit.updated(&before, &after).await;
        info!(order_id = id, "Order marked as paid");
        Ok(after)
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, id: i64) -> Result<Order, ServiceError> {
        let before = self.find_by_id(id).await?;
        let cannot_cancel = |order: &Order| ServiceError::OrderCannotBeCancelled {
            order_id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
        };
        if !before.status.can_be_cancelled() {
            return Err(cannot_cancel(&before));
        }

        let after = match self.orders.cancel_and_restock(id).await {
            Ok(order) => order,
            Err(RepositoryError::Conflict(_)) => {
                let current = self.find_by_id(id).await?;
                return Err(cannot_cancel(&current));
            }
            Err(err) => return Err(err.into()),
        };
        self.invalidate_stock(&after).await;

        self.audit.updated(&before, &after).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::OrderCancelled {
                order_id: after.id,
                order_number: after.order_number.clone(),
            },
        )
        .await;
        info!(order_id = id, order_number = %after.order_number, "Order cancelled");
        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, sample_product};
    use model::PaymentStatus;

    fn shipping() -> Address {
        Address {
            name: Some("Ayşe Yılmaz".into()),
            phone: Some("05551112233".into()),
            address: Some("Bağdat Cad. 12".into()),
            city: Some("İstanbul".into()),
            district: Some("Kadıköy".into()),
            postal_code: Some("34710".into()),
            country: "TR".into(),
        }
    }

    fn place(user_id: i64, items: Vec<OrderLine>) -> PlaceOrder {
        PlaceOrder {
            user_id,
            items,
            shipping: shipping(),
            billing: None,
            notes: None,
            currency: None,
        }
    }

    fn line(product_id: i64, quantity: i32) -> OrderLine {
        OrderLine {
            product_id,
            quantity,
        }
    }

    #[test]
    fn test_totals_below_free_shipping() {
        let totals = calculate_totals(10_000, &ShopSettings::default());
        assert_eq!(totals.tax_amount, 2_000);
        assert_eq!(totals.shipping_amount, 2_990);
        assert_eq!(totals.total_amount, 14_990);
    }

    #[test]
    fn test_totals_free_shipping_and_rounding() {
        let totals = calculate_totals(50_003, &ShopSettings::default());
        assert_eq!(totals.tax_amount, 10_001);
        assert_eq!(totals.shipping_amount, 0);
        assert_eq!(totals.total_amount, 60_004);
    }

    #[test]
    fn test_order_number_format() {
        let number = generate_order_number(&ShopSettings::default());
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert!(parts[2].parse::<i64>().is_ok());
    }

    #[test]
    fn test_merge_lines() {
        let merged = merge_lines(&[line(1, 2), line(2, 1), line(1, 3)]);
        assert_eq!(merged, vec![line(1, 5), line(2, 1)]);
    }

    #[tokio::test]
    async fn test_create_order_decrements_stock() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 10_000, 5));
        h.products_repo.insert(sample_product(2, 2_500, 10));

        let order = h
            .orders()
            .create_order(place(7, vec![line(1, 2), line(2, 1), line(1, 1), line(99, 1)]))
            .await
            .unwrap();

        assert_eq!(order.items.len(), 2);
        assert_eq!(order.subtotal, 32_500);
        assert_eq!(order.tax_amount, 6_500);
        assert_eq!(order.shipping_amount, 2_990);
        assert_eq!(order.total_amount, 41_990);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.billing.city.as_deref(), Some("İstanbul"));
        assert_eq!(h.products_repo.quantity_of(1), Some(2));
        assert_eq!(h.products_repo.quantity_of(2), Some(9));
        assert_eq!(h.events.names(), vec!["order_placed"]);
    }

    #[tokio::test]
    async fn test_create_order_insufficient_stock() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 10_000, 2));

        let err = h
            .orders()
            .create_order(place(7, vec![line(1, 3)]))
            .await
            .unwrap_err();
        match err {
            ServiceError::InsufficientStock {
                product_id,
                requested,
                available,
                ..
            } => assert_eq!((product_id, requested, available), (1, 3, 2)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.products_repo.quantity_of(1), Some(2));
    }

    #[tokio::test]
    async fn test_create_order_empty_cart() {
        let h = Harness::new();
        let err = h.orders().create_order(place(7, vec![])).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyCart));

        let err = h
            .orders()
            .create_order(place(7, vec![line(404, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmptyCart));
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_once() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 10_000, 5));
        let order = h
            .orders()
            .create_order(place(7, vec![line(1, 4)]))
            .await
            .unwrap();
        assert_eq!(h.products_repo.quantity_of(1), Some(1));

        let cancelled = h.orders().cancel_order(order.id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.products_repo.quantity_of(1), Some(5));

        let err = h.orders().cancel_order(order.id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::OrderCannotBeCancelled { status: OrderStatus::Cancelled, .. }
        ));
        assert_eq!(h.products_repo.quantity_of(1), Some(5));
    }

    #[tokio::test]
    async fn test_create_order_refreshes_cached_stock() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 10_000, 5));
        let cached = h.products().get(1).await.unwrap();
        assert_eq!(cached.quantity, 5);

        h.orders()
            .create_order(place(7, vec![line(1, 5)]))
            .await
            .unwrap();

        let served = h.products().get(1).await.unwrap();
        assert_eq!(served.quantity, 0);
        assert!(!served.in_stock());
    }

    #[tokio::test]
    async fn test_cancel_refreshes_cached_stock() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 10_000, 5));
        let order = h
            .orders()
            .create_order(place(7, vec![line(1, 3)]))
            .await
            .unwrap();
        assert_eq!(h.products().get(1).await.unwrap().quantity, 2);

        h.orders().cancel_order(order.id).await.unwrap();

        assert_eq!(h.products().get(1).await.unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_mark_as_paid() {
        let h = Harness::new();
        h.products_repo.insert(sample_product(1, 10_000, 5));
        let order = h
            .orders()
            .create_order(place(7, vec![line(1, 1)]))
            .await
            .unwrap();

        let paid = h.orders().mark_as_paid(order.id).await.unwrap();
        assert!(paid.is_paid());
        assert!(paid.paid_at.is_some());
        assert!(matches!(
            h.orders().cancel_order(order.id).await,
            Err(ServiceError::OrderCannotBeCancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_order() {
        let h = Harness::new();
        assert!(matches!(h.orders().find_by_id(1).await, Err(ServiceError::OrderNotFound)));
        assert!(matches!(
            h.orders().find_by_order_number("ORD-X-1").await,
            Err(ServiceError::OrderNotFound)
        ));
    }
}
