use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use model::{Address, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, Page, PageRequest};
use tokio_postgres::{Client, Row};

use crate::RepositoryError;

const ORDER_COLUMNS: &str = "id, user_id, order_number, status, subtotal, tax_amount, \
     shipping_amount, discount_amount, total_amount, currency, shipping_name, shipping_phone, \
     shipping_address, shipping_city, shipping_district, shipping_postal_code, shipping_country, \
     billing_name, billing_phone, billing_address, billing_city, billing_district, \
     billing_postal_code, billing_country, payment_method, payment_status, paid_at, notes, \
     created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, product_sku, \
     product_description, product_image, quantity, unit_price, total_price, created_at";

/// # OrdersRepository
///
/// Orders and their line items. Stock bookkeeping happens here so that it
/// shares a transaction with the order rows.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Decrements stock for every line, inserts the order and its items.
    ///
    /// Everything runs in one transaction. When a product no longer has
    /// enough stock the transaction is rolled back and
    /// [`RepositoryError::InsufficientStock`] is returned.
    async fn create_with_items(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> Result<Order, RepositoryError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, RepositoryError>;
    async fn find_by_order_number(&self, number: &str) -> Result<Option<Order>, RepositoryError>;
    /// Newest first.
    async fn paginate_for_user(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<Order>, RepositoryError>;
    async fn recent_for_user(&self, user_id: i64, limit: i64)
    -> Result<Vec<Order>, RepositoryError>;
    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, RepositoryError>;
    /// Sets status `paid`, payment status `completed` and `paid_at`.
    async fn mark_paid(&self, id: i64) -> Result<Order, RepositoryError>;
    /// Cancels a pending or processing order and puts its items back in stock.
    ///
    /// Returns [`RepositoryError::Conflict`] when the order left those states.
    async fn cancel_and_restock(&self, id: i64) -> Result<Order, RepositoryError>;
}

pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn load_one(
        &self,
        client: &Client,
        row: Option<Row>,
    ) -> Result<Option<Order>, RepositoryError> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut orders = vec![order_from_row(&row)];
        attach_items(client, &mut orders).await?;
        Ok(orders.pop())
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn create_with_items(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> Result<Order, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        for item in items {
            let decremented = tx
                .execute(
                    r#"
                    UPDATE products SET quantity = quantity - $1, updated_at = now()
                    WHERE id = $2 AND deleted_at IS NULL AND quantity >= $1
                    "#,
                    &[&item.quantity, &item.product_id],
                )
                .await?;
            if decremented == 0 {
                let available = tx
                    .query_opt(
                        "SELECT quantity FROM products WHERE id = $1",
                        &[&item.product_id],
                    )
                    .await?
                    .map(|row| row.get::<_, i32>(0))
                    .unwrap_or(0);
                return Err(RepositoryError::InsufficientStock {
                    product_id: item.product_id,
                    available,
                });
            }
        }

        let (shipping, billing) = (&order.shipping, &order.billing);
        let row = tx
            .query_one(
                r#"
                INSERT INTO orders (
                    user_id, order_number, status, subtotal, tax_amount, shipping_amount,
                    discount_amount, total_amount, currency,
                    shipping_name, shipping_phone, shipping_address, shipping_city,
                    shipping_district, shipping_postal_code, shipping_country,
                    billing_name, billing_phone, billing_address, billing_city,
                    billing_district, billing_postal_code, billing_country,
                    payment_status, notes
                )
                VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8,
                        $9, $10, $11, $12, $13, $14, $15,
                        $16, $17, $18, $19, $20, $21, $22,
                        'pending', $23)
                RETURNING id
                "#,
                &[
                    &order.user_id,
                    &order.order_number,
                    &order.subtotal,
                    &order.tax_amount,
                    &order.shipping_amount,
                    &order.discount_amount,
                    &order.total_amount,
                    &order.currency,
                    &shipping.name,
                    &shipping.phone,
                    &shipping.address,
                    &shipping.city,
                    &shipping.district,
                    &shipping.postal_code,
                    &shipping.country,
                    &billing.name,
                    &billing.phone,
                    &billing.address,
                    &billing.city,
                    &billing.district,
                    &billing.postal_code,
                    &billing.country,
                    &order.notes,
                ],
            )
            .await?;
        let order_id: i64 = row.get("id");

        for item in items {
            tx.execute(
                r#"
                INSERT INTO order_items (
                    order_id, product_id, product_name, product_sku, product_description,
                    product_image, quantity, unit_price, total_price
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
                &[
                    &order_id,
                    &item.product_id,
                    &item.product_name,
                    &item.product_sku,
                    &item.product_description,
                    &item.product_image,
                    &item.quantity,
                    &item.unit_price,
                    &item.total_price,
                ],
            )
            .await?;
        }

        tx.commit().await?;

        self.find_by_id(order_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        self.load_one(&client, row).await
    }

    async fn find_by_order_number(&self, number: &str) -> Result<Option<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let row = client.query_opt(sql.as_str(), &[&number]).await?;
        self.load_one(&client, row).await
    }

    async fn paginate_for_user(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let total: i64 = client
            .query_one("SELECT COUNT(*) FROM orders WHERE user_id = $1", &[&user_id])
            .await?
            .get(0);

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        let rows = client
            .query(sql.as_str(), &[&user_id, &page.limit(), &page.offset()])
            .await?;

        let mut orders: Vec<Order> = rows.iter().map(order_from_row).collect();
        attach_items(&client, &mut orders).await?;
        Ok(Page::new(orders, total, page))
    }

    async fn recent_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = client.query(sql.as_str(), &[&user_id, &limit]).await?;
        let mut orders: Vec<Order> = rows.iter().map(order_from_row).collect();
        attach_items(&client, &mut orders).await?;
        Ok(orders)
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id, &status]).await?;
        self.load_one(&client, row)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn mark_paid(&self, id: i64) -> Result<Order, RepositoryError> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE orders
             SET status = 'paid', payment_status = 'completed', paid_at = now(), updated_at = now()
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        );
        let row = client.query_opt(sql.as_str(), &[&id]).await?;
        self.load_one(&client, row)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn cancel_and_restock(&self, id: i64) -> Result<Order, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let cancelled = tx
            .execute(
                r#"
                UPDATE orders SET status = 'cancelled', updated_at = now()
                WHERE id = $1 AND status IN ('pending', 'processing')
                "#,
                &[&id],
            )
            .await?;
        if cancelled == 0 {
            return Err(RepositoryError::Conflict(format!(
                "order {id} can no longer be cancelled"
            )));
        }

        tx.execute(
            r#"
            UPDATE products p SET quantity = p.quantity + s.quantity, updated_at = now()
            FROM (
                SELECT product_id, SUM(quantity)::INTEGER AS quantity
                FROM order_items WHERE order_id = $1 GROUP BY product_id
            ) s
            WHERE p.id = s.product_id
            "#,
            &[&id],
        )
        .await?;
        tx.commit().await?;

        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)
    }
}

async fn attach_items(client: &Client, orders: &mut [Order]) -> Result<(), RepositoryError> {
    let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
    if ids.is_empty() {
        return Ok(());
    }

    let sql = format!("SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY id");
    let rows = client.query(sql.as_str(), &[&ids]).await?;

    let mut by_order: HashMap<i64, Vec<OrderItem>> = HashMap::new();
    for row in &rows {
        let item = item_from_row(row);
        by_order.entry(item.order_id).or_default().push(item);
    }
    for order in orders.iter_mut() {
        order.items = by_order.remove(&order.id).unwrap_or_default();
    }
    Ok(())
}

fn order_from_row(row: &Row) -> Order {
    Order {
        id: row.get("id"),
        user_id: row.get("user_id"),
        order_number: row.get("order_number"),
        status: row.get("status"),
        subtotal: row.get("subtotal"),
        tax_amount: row.get("tax_amount"),
        shipping_amount: row.get("shipping_amount"),
        discount_amount: row.get("discount_amount"),
        total_amount: row.get("total_amount"),
        currency: row.get("currency"),
        shipping: Address {
            name: row.get("shipping_name"),
            phone: row.get("shipping_phone"),
            address: row.get("shipping_address"),
            city: row.get("shipping_city"),
            district: row.get("shipping_district"),
            postal_code: row.get("shipping_postal_code"),
            country: row.get("shipping_country"),
        },
        billing: Address {
            name: row.get("billing_name"),
            phone: row.get("billing_phone"),
            address: row.get("billing_address"),
            city: row.get("billing_city"),
            district: row.get("billing_district"),
            postal_code: row.get("billing_postal_code"),
            country: row.get("billing_country"),
        },
        payment_method: row.get("payment_method"),
        payment_status: row.get("payment_status"),
        paid_at: row.get("paid_at"),
        notes: row.get("notes"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        items: Vec::new(),
    }
}

fn item_from_row(row: &Row) -> OrderItem {
    OrderItem {
        id: row.get("id"),
        order_id: row.get("order_id"),
        product_id: row.get("product_id"),
        product_name: row.get("product_name"),
        product_sku: row.get("product_sku"),
        product_description: row.get("product_description"),
        product_image: row.get("product_image"),
        quantity: row.get("quantity"),
        unit_price: row.get("unit_price"),
        total_price: row.get("total_price"),
        created_at: row.get("created_at"),
    }
}
