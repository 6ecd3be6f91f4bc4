//! In-memory repositories, a fake PayTR gateway and a recording event
//! publisher, plus a [`Harness`] wiring them into real services.
//!
//! Compiled for this crate's tests and for dependents enabling the
//! `testing` feature.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use app_config::{PayTrSettings, ShopSettings};
use async_trait::async_trait;
use cache::CatalogCache;
use chrono::Utc;
use model::{
    AccessToken, Address, AuditLog, Category, CategoryParent, EventEnvelope, NewAuditLog,
    NewOrder, NewOrderItem, NewPayment, NewProduct, NewUser, Order, OrderItem, OrderStatus, Page,
    PageRequest, Payment, PaymentStatus, Product, ProductFilter, ProductSort, SortOrder, User,
    WishlistItem,
};
use repository::{
    AuditRepository, CategoriesRepository, OrdersRepository, PaymentsRepository,
    ProductsRepository, RepositoryError, TokensRepository, UsersRepository, WishlistRepository,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::auth::AuthService;
use crate::catalog::{CategoryService, ProductService};
use crate::events::{EventPublisher, PublishError};
use crate::orders::OrderServiceImpl;
use crate::payments::PaymentService;
use crate::paytr::{GatewayError, PayTrSigner, PaymentGateway, TokenRequest};
use crate::wishlist::WishlistService;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let slice = items
        .iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .cloned()
        .collect();
    Page::new(slice, items.len() as i64, page)
}

pub fn sample_user(id: i64, email: &str) -> User {
    let now = Utc::now();
    User {
        id,
        name: "Test Kullanıcı".to_string(),
        email: email.to_string(),
        password_hash: String::new(),
        email_verified_at: Some(now),
        verification_token: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn sample_category(id: i64, slug: &str, parent_id: Option<i64>, is_active: bool) -> Category {
    let now = Utc::now();
    Category {
        id,
        name: slug.to_string(),
        slug: slug.to_string(),
        description: None,
        parent_id,
        sort_order: 0,
        is_active,
        created_at: now,
        updated_at: now,
        children: vec![],
    }
}

pub fn sample_product(id: i64, price: i64, quantity: i32) -> Product {
    let now = Utc::now();
    Product {
        id,
        uuid: Uuid::new_v4(),
        name: format!("Ürün {id}"),
        slug: format!("urun-{id}"),
        sku: format!("SKU-{id:04}"),
        description: Some("Test ürünü".to_string()),
        price,
        compare_price: None,
        cost: None,
        quantity,
        low_stock_threshold: 10,
        is_active: true,
        is_featured: false,
        meta_title: None,
        meta_description: None,
        metadata: Some(json!({ "images": [format!("https://cdn.example.com/{id}.jpg")] })),
        published_at: Some(now),
        created_at: now,
        updated_at: now,
        categories: vec![],
    }
}

/// A pending order with a single line of 100.00.
pub fn sample_order(id: i64, user_id: i64) -> Order {
    let now = Utc::now();
    Order {
        id,
        user_id,
        order_number: format!("ORD-TEST{id:04}-1700000000"),
        status: OrderStatus::Pending,
        subtotal: 10_000,
        tax_amount: 2_000,
        shipping_amount: 0,
        discount_amount: 0,
        total_amount: 12_000,
        currency: "TRY".to_string(),
        shipping: Address {
            country: "TR".to_string(),
            ..Default::default()
        },
        billing: Address {
            country: "TR".to_string(),
            ..Default::default()
        },
        payment_method: None,
        payment_status: PaymentStatus::Pending,
        paid_at: None,
        notes: None,
        created_at: now,
        updated_at: now,
        items: vec![OrderItem {
            id: id * 100,
            order_id: id,
            product_id: 1,
            product_name: "Ürün 1".to_string(),
            product_sku: "SKU-0001".to_string(),
            product_description: None,
            product_image: None,
            quantity: 1,
            unit_price: 10_000,
            total_price: 10_000,
            created_at: now,
        }],
    }
}

pub fn sample_payment(id: i64, user_id: i64, merchant_oid: &str) -> Payment {
    let now = Utc::now();
    Payment {
        id,
        user_id,
        order_id: None,
        merchant_oid: merchant_oid.to_string(),
        payment_provider: "paytr".to_string(),
        payment_method: None,
        amount: 12_000,
        currency: "TRY".to_string(),
        status: PaymentStatus::Pending,
        paytr_token: Some("secret-token".to_string()),
        transaction_id: None,
        masked_pan: None,
        installment_count: None,
        provider_response: Some(json!({ "status": "success" })),
        error_message: None,
        terms_accepted: true,
        terms_accepted_at: Some(now),
        terms_acceptance_ip: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn paytr_settings() -> PayTrSettings {
    PayTrSettings {
        merchant_id: "100001".to_string(),
        merchant_key: "harness-key".to_string(),
        merchant_salt: "harness-salt".to_string(),
        test_mode: true,
        api_url: "http://paytr.invalid/odeme/api/get-token".to_string(),
        iframe_url: "https://www.paytr.com/odeme/guvenli/".to_string(),
        timeout: Duration::from_secs(5),
        frontend_url: "http://localhost:3000".to_string(),
    }
}

#[derive(Default)]
pub struct InMemoryUsersRepository {
    users: Mutex<Vec<User>>,
    ids: Sequence,
}

impl InMemoryUsersRepository {
    pub fn insert(&self, user: User) {
        lock(&self.users).push(user);
    }

    pub fn verification_token_of(&self, email: &str) -> Option<String> {
        lock(&self.users)
            .iter()
            .find(|u| u.email == email)
            .and_then(|u| u.verification_token.clone())
    }

    fn update(&self, id: i64, f: impl FnOnce(&mut User)) -> Result<User, RepositoryError> {
        let mut users = lock(&self.users);
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepositoryError::NotFound)?;
        f(user);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl UsersRepository for InMemoryUsersRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(lock(&self.users).iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(lock(&self.users).iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, RepositoryError> {
        Ok(lock(&self.users)
            .iter()
            .find(|u| u.verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create(&self, user: &NewUser) -> Result<User, RepositoryError> {
        let mut users = lock(&self.users);
        if users.iter().any(|u| u.email == user.email) {
            return Err(RepositoryError::UniqueViolation("users_email_key".into()));
        }
        let now = Utc::now();
        let created = User {
            id: self.ids.next(),
            name: user.name.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            email_verified_at: None,
            verification_token: Some(user.verification_token.clone()),
            created_at: now,
            updated_at: now,
        };
        users.push(created.clone());
        Ok(created)
    }

    async fn set_verification_token(&self, id: i64, token: &str) -> Result<User, RepositoryError> {
        self.update(id, |u| u.verification_token = Some(token.to_string()))
    }

    async fn mark_email_verified(&self, id: i64) -> Result<User, RepositoryError> {
        self.update(id, |u| {
            u.email_verified_at = Some(Utc::now());
            u.verification_token = None;
        })
    }
}

#[derive(Default)]
pub struct InMemoryTokensRepository {
    tokens: Mutex<Vec<AccessToken>>,
    ids: Sequence,
}

#[async_trait]
impl TokensRepository for InMemoryTokensRepository {
    async fn create(
        &self,
        user_id: i64,
        name: &str,
        token_hash: &str,
    ) -> Result<AccessToken, RepositoryError> {
        let token = AccessToken {
            id: self.ids.next(),
            user_id,
            name: name.to_string(),
            token_hash: token_hash.to_string(),
            last_used_at: None,
            created_at: Utc::now(),
        };
        lock(&self.tokens).push(token.clone());
        Ok(token)
    }

    async fn find(&self, id: i64) -> Result<Option<AccessToken>, RepositoryError> {
        Ok(lock(&self.tokens).iter().find(|t| t.id == id).cloned())
    }

    async fn touch(&self, id: i64) -> Result<(), RepositoryError> {
        if let Some(token) = lock(&self.tokens).iter_mut().find(|t| t.id == id) {
            token.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut tokens = lock(&self.tokens);
        let before = tokens.len();
        tokens.retain(|t| t.id != id);
        Ok(tokens.len() < before)
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64, RepositoryError> {
        let mut tokens = lock(&self.tokens);
        let before = tokens.len();
        tokens.retain(|t| t.user_id != user_id);
        Ok((before - tokens.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryCategoriesRepository {
    categories: Mutex<Vec<Category>>,
}

impl InMemoryCategoriesRepository {
    pub fn insert(&self, category: Category) {
        lock(&self.categories).push(category);
    }

    fn with_children(&self, all: &[Category], mut category: Category) -> Category {
        category.children = all
            .iter()
            .filter(|c| c.is_active && c.parent_id == Some(category.id))
            .cloned()
            .collect();
        category
    }

    fn by_ids(&self, ids: &[i64]) -> Vec<Category> {
        lock(&self.categories)
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CategoriesRepository for InMemoryCategoriesRepository {
    async fn list_active(
        &self,
        parent: CategoryParent,
        with_children: bool,
    ) -> Result<Vec<Category>, RepositoryError> {
        let all = lock(&self.categories).clone();
        let mut list: Vec<Category> = all
            .iter()
            .filter(|c| c.is_active)
            .filter(|c| match parent {
                CategoryParent::Any => true,
                CategoryParent::Root => c.parent_id.is_none(),
                CategoryParent::Id(id) => c.parent_id == Some(id),
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| (a.sort_order, &a.name).cmp(&(b.sort_order, &b.name)));
        if with_children {
            list = list
                .into_iter()
                .map(|c| self.with_children(&all, c))
                .collect();
        }
        Ok(list)
    }

    async fn find_by_id(
        &self,
        id: i64,
        with_children: bool,
    ) -> Result<Option<Category>, RepositoryError> {
        let all = lock(&self.categories).clone();
        let found = all.iter().find(|c| c.id == id).cloned();
        Ok(match (found, with_children) {
            (Some(c), true) => Some(self.with_children(&all, c)),
            (found, _) => found,
        })
    }

    async fn find_by_slug(
        &self,
        slug: &str,
        with_children: bool,
    ) -> Result<Option<Category>, RepositoryError> {
        let all = lock(&self.categories).clone();
        let found = all.iter().find(|c| c.slug == slug && c.is_active).cloned();
        Ok(match (found, with_children) {
            (Some(c), true) => Some(self.with_children(&all, c)),
            (found, _) => found,
        })
    }

    async fn existing_ids(&self, ids: &[i64]) -> Result<Vec<i64>, RepositoryError> {
        Ok(self.by_ids(ids).into_iter().map(|c| c.id).collect())
    }
}

pub struct InMemoryProductsRepository {
    products: Mutex<BTreeMap<i64, Product>>,
    deleted: Mutex<HashSet<i64>>,
    categories: Arc<InMemoryCategoriesRepository>,
    ids: Sequence,
}

impl InMemoryProductsRepository {
    pub fn new(categories: Arc<InMemoryCategoriesRepository>) -> Self {
        Self {
            products: Mutex::new(BTreeMap::new()),
            deleted: Mutex::new(HashSet::new()),
            categories,
            ids: Sequence(AtomicI64::new(1_000)),
        }
    }

    pub fn insert(&self, product: Product) {
        lock(&self.products).insert(product.id, product);
    }

    pub fn set_quantity(&self, id: i64, quantity: i32) {
        if let Some(p) = lock(&self.products).get_mut(&id) {
            p.quantity = quantity;
        }
    }

    pub fn quantity_of(&self, id: i64) -> Option<i32> {
        lock(&self.products).get(&id).map(|p| p.quantity)
    }

    fn live(&self) -> Vec<Product> {
        let deleted = lock(&self.deleted).clone();
        lock(&self.products)
            .values()
            .filter(|p| !deleted.contains(&p.id))
            .cloned()
            .collect()
    }

    /// Decrements every line or none of them.
    fn reserve(&self, items: &[NewOrderItem]) -> Result<(), RepositoryError> {
        let mut products = lock(&self.products);
        for item in items {
            let available = products.get(&item.product_id).map_or(0, |p| p.quantity);
            if available < item.quantity {
                return Err(RepositoryError::InsufficientStock {
                    product_id: item.product_id,
                    available,
                });
            }
        }
        for item in items {
            if let Some(p) = products.get_mut(&item.product_id) {
                p.quantity -= item.quantity;
            }
        }
        Ok(())
    }

    fn restock(&self, items: &[OrderItem]) {
        let mut products = lock(&self.products);
        for item in items {
            if let Some(p) = products.get_mut(&item.product_id) {
                p.quantity += item.quantity;
            }
        }
    }
}

#[async_trait]
impl ProductsRepository for InMemoryProductsRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>, RepositoryError> {
        Ok(self.live().into_iter().find(|p| p.id == id))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Product>, RepositoryError> {
        Ok(self.live().into_iter().find(|p| p.slug == slug))
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>, RepositoryError> {
        Ok(self
            .live()
            .into_iter()
            .filter(|p| ids.contains(&p.id))
            .collect())
    }

    async fn paginate(&self, filter: &ProductFilter) -> Result<Page<Product>, RepositoryError> {
        let search = filter.search.as_deref().map(str::to_lowercase);
        let mut items: Vec<Product> = self
            .live()
            .into_iter()
            .filter(|p| {
                search.as_deref().is_none_or(|s| {
                    p.name.to_lowercase().contains(s) || p.sku.to_lowercase().contains(s)
                })
            })
            .filter(|p| filter.is_active.is_none_or(|a| p.is_active == a))
            .filter(|p| filter.min_price.is_none_or(|min| p.price >= min))
            .filter(|p| filter.max_price.is_none_or(|max| p.price <= max))
            .filter(|p| {
                filter.categories.is_empty()
                    || p.categories.iter().any(|c| filter.categories.contains(&c.id))
            })
            .collect();
        items.sort_by(|a, b| match filter.sort_by {
            ProductSort::Name => a.name.cmp(&b.name),
            ProductSort::Price => a.price.cmp(&b.price),
            ProductSort::Quantity => a.quantity.cmp(&b.quantity),
            ProductSort::CreatedAt => (a.created_at, a.id).cmp(&(b.created_at, b.id)),
        });
        if filter.sort_order == SortOrder::Desc {
            items.reverse();
        }
        Ok(paginate(&items, filter.page))
    }

    async fn sku_exists(&self, sku: &str, except_id: Option<i64>) -> Result<bool, RepositoryError> {
        Ok(self
            .live()
            .iter()
            .any(|p| p.sku == sku && Some(p.id) != except_id))
    }

    async fn slug_exists(
        &self,
        slug: &str,
        except_id: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .live()
            .iter()
            .any(|p| p.slug == slug && Some(p.id) != except_id))
    }

    async fn create(
        &self,
        product: &NewProduct,
        categories: &[i64],
    ) -> Result<Product, RepositoryError> {
        let now = Utc::now();
        let created = Product {
            id: self.ids.next(),
            uuid: Uuid::new_v4(),
            name: product.name.clone(),
            slug: product.slug.clone(),
            sku: product.sku.clone(),
            description: product.description.clone(),
            price: product.price,
            compare_price: product.compare_price,
            cost: product.cost,
            quantity: product.quantity,
            low_stock_threshold: 10,
            is_active: product.is_active,
            is_featured: product.is_featured,
            meta_title: product.meta_title.clone(),
            meta_description: product.meta_description.clone(),
            metadata: product.metadata.clone(),
            published_at: None,
            created_at: now,
            updated_at: now,
            categories: self.categories.by_ids(categories),
        };
        self.insert(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        product: &Product,
        categories: Option<&[i64]>,
    ) -> Result<Product, RepositoryError> {
        let mut updated = product.clone();
        updated.updated_at = Utc::now();
        if let Some(ids) = categories {
            updated.categories = self.categories.by_ids(ids);
        }
        let mut products = lock(&self.products);
        if !products.contains_key(&product.id) {
            return Err(RepositoryError::NotFound);
        }
        products.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn soft_delete(&self, id: i64) -> Result<bool, RepositoryError> {
        if !lock(&self.products).contains_key(&id) {
            return Ok(false);
        }
        Ok(lock(&self.deleted).insert(id))
    }
}

pub struct InMemoryOrdersRepository {
    orders: Mutex<Vec<Order>>,
    products: Arc<InMemoryProductsRepository>,
    ids: Sequence,
    item_ids: Sequence,
}

impl InMemoryOrdersRepository {
    pub fn new(products: Arc<InMemoryProductsRepository>) -> Self {
        Self {
            orders: Mutex::new(Vec::new()),
            products,
            ids: Sequence::default(),
            item_ids: Sequence::default(),
        }
    }

    pub fn insert(&self, order: Order) {
        lock(&self.orders).push(order);
    }

    fn update(&self, id: i64, f: impl FnOnce(&mut Order)) -> Result<Order, RepositoryError> {
        let mut orders = lock(&self.orders);
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(RepositoryError::NotFound)?;
        f(order);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    fn for_user(&self, user_id: i64) -> Vec<Order> {
        let mut orders: Vec<Order> = lock(&self.orders)
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.id.cmp(&a.id));
        orders
    }
}

#[async_trait]
impl OrdersRepository for InMemoryOrdersRepository {
    async fn create_with_items(
        &self,
        order: &NewOrder,
        items: &[NewOrderItem],
    ) -> Result<Order, RepositoryError> {
        self.products.reserve(items)?;

        let now = Utc::now();
        let id = self.ids.next();
        let created = Order {
            id,
            user_id: order.user_id,
            order_number: order.order_number.clone(),
            status: OrderStatus::Pending,
            subtotal: order.subtotal,
            tax_amount: order.tax_amount,
            shipping_amount: order.shipping_amount,
            discount_amount: order.discount_amount,
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            shipping: order.shipping.clone(),
            billing: order.billing.clone(),
            payment_method: None,
            payment_status: PaymentStatus::Pending,
            paid_at: None,
            notes: order.notes.clone(),
            created_at: now,
            updated_at: now,
            items: items
                .iter()
                .map(|item| OrderItem {
                    id: self.item_ids.next(),
                    order_id: id,
                    product_id: item.product_id,
                    product_name: item.product_name.clone(),
                    product_sku: item.product_sku.clone(),
                    product_description: item.product_description.clone(),
                    product_image: item.product_image.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_price: item.total_price,
                    created_at: now,
                })
                .collect(),
        };
        self.insert(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Order>, RepositoryError> {
        Ok(lock(&self.orders).iter().find(|o| o.id == id).cloned())
    }

    async fn find_by_order_number(&self, number: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(lock(&self.orders)
            .iter()
            .find(|o| o.order_number == number)
            .cloned())
    }

    async fn paginate_for_user(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<Order>, RepositoryError> {
        Ok(paginate(&self.for_user(user_id), page))
    }

    async fn recent_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut orders = self.for_user(user_id);
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, RepositoryError> {
        self.update(id, |o| o.status = status)
    }

    async fn mark_paid(&self, id: i64) -> Result<Order, RepositoryError> {
        self.update(id, |o| {
            o.status = OrderStatus::Paid;
            o.payment_status = PaymentStatus::Completed;
            o.paid_at = Some(Utc::now());
        })
    }

    async fn cancel_and_restock(&self, id: i64) -> Result<Order, RepositoryError> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        if !current.status.can_be_cancelled() {
            return Err(RepositoryError::Conflict(format!(
                "order {id} is {}",
                current.status
            )));
        }
        let cancelled = self.update(id, |o| o.status = OrderStatus::Cancelled)?;
        self.products.restock(&cancelled.items);
        Ok(cancelled)
    }
}

#[derive(Default)]
pub struct InMemoryPaymentsRepository {
    payments: Mutex<Vec<Payment>>,
    ids: Sequence,
}

impl InMemoryPaymentsRepository {
    pub fn get(&self, id: i64) -> Option<Payment> {
        lock(&self.payments).iter().find(|p| p.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Payment> {
        lock(&self.payments).clone()
    }

    fn transition(&self, id: i64, f: impl FnOnce(&mut Payment)) -> Option<Payment> {
        let mut payments = lock(&self.payments);
        let payment = payments.iter_mut().find(|p| {
            p.id == id && matches!(p.status, PaymentStatus::Pending | PaymentStatus::Processing)
        })?;
        f(payment);
        payment.updated_at = Utc::now();
        Some(payment.clone())
    }
}

#[async_trait]
impl PaymentsRepository for InMemoryPaymentsRepository {
    async fn create(&self, payment: &NewPayment) -> Result<Payment, RepositoryError> {
        let mut payments = lock(&self.payments);
        if payments.iter().any(|p| p.merchant_oid == payment.merchant_oid) {
            return Err(RepositoryError::UniqueViolation(
                "payments_merchant_oid_key".into(),
            ));
        }
        let now = Utc::now();
        let created = Payment {
            id: self.ids.next(),
            user_id: payment.user_id,
            order_id: payment.order_id,
            merchant_oid: payment.merchant_oid.clone(),
            payment_provider: payment.payment_provider.clone(),
            payment_method: None,
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: PaymentStatus::Pending,
            paytr_token: None,
            transaction_id: None,
            masked_pan: None,
            installment_count: None,
            provider_response: None,
            error_message: None,
            terms_accepted: payment.terms_accepted,
            terms_accepted_at: payment.terms_accepted_at,
            terms_acceptance_ip: payment.terms_acceptance_ip.clone(),
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        payments.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.get(id))
    }

    async fn find_by_merchant_oid(
        &self,
        merchant_oid: &str,
    ) -> Result<Option<Payment>, RepositoryError> {
        Ok(lock(&self.payments)
            .iter()
            .find(|p| p.merchant_oid == merchant_oid)
            .cloned())
    }

    async fn mark_processing(&self, id: i64, token: &str) -> Result<Payment, RepositoryError> {
        let mut payments = lock(&self.payments);
        let payment = payments
            .iter_mut()
            .find(|p| p.id == id && p.status == PaymentStatus::Pending)
            .ok_or(RepositoryError::NotFound)?;
        payment.status = PaymentStatus::Processing;
        payment.paytr_token = Some(token.to_string());
        Ok(payment.clone())
    }

    async fn complete_if_open(
        &self,
        id: i64,
        transaction_id: &str,
        provider_response: &Value,
    ) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.transition(id, |p| {
            p.status = PaymentStatus::Completed;
            p.transaction_id = Some(transaction_id.to_string());
            p.provider_response = Some(provider_response.clone());
            p.completed_at = Some(Utc::now());
        }))
    }

    async fn fail_if_open(
        &self,
        id: i64,
        error_message: &str,
        provider_response: Option<&Value>,
    ) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.transition(id, |p| {
            p.status = PaymentStatus::Failed;
            p.error_message = Some(error_message.to_string());
            if let Some(response) = provider_response {
                p.provider_response = Some(response.clone());
            }
        }))
    }
}

pub struct InMemoryWishlistRepository {
    items: Mutex<Vec<WishlistItem>>,
    products: Arc<InMemoryProductsRepository>,
    ids: Sequence,
}

impl InMemoryWishlistRepository {
    pub fn new(products: Arc<InMemoryProductsRepository>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            products,
            ids: Sequence::default(),
        }
    }

    fn with_product(&self, mut item: WishlistItem) -> WishlistItem {
        item.product = self
            .products
            .live()
            .into_iter()
            .find(|p| p.id == item.product_id);
        item
    }

    fn for_user(&self, user_id: i64) -> Vec<WishlistItem> {
        let items: Vec<WishlistItem> = lock(&self.items)
            .iter()
            .filter(|i| i.user_id == user_id)
            .rev()
            .cloned()
            .collect();
        items.into_iter().map(|i| self.with_product(i)).collect()
    }
}

#[async_trait]
impl WishlistRepository for InMemoryWishlistRepository {
    async fn add(&self, user_id: i64, product_id: i64) -> Result<WishlistItem, RepositoryError> {
        let item = {
            let mut items = lock(&self.items);
            match items
                .iter()
                .find(|i| i.user_id == user_id && i.product_id == product_id)
            {
                Some(existing) => existing.clone(),
                None => {
                    let item = WishlistItem {
                        id: self.ids.next(),
                        user_id,
                        product_id,
                        created_at: Utc::now(),
                        product: None,
                    };
                    items.push(item.clone());
                    item
                }
            }
        };
        Ok(self.with_product(item))
    }

    async fn remove(&self, user_id: i64, product_id: i64) -> Result<bool, RepositoryError> {
        let mut items = lock(&self.items);
        let before = items.len();
        items.retain(|i| !(i.user_id == user_id && i.product_id == product_id));
        Ok(items.len() < before)
    }

    async fn contains(&self, user_id: i64, product_id: i64) -> Result<bool, RepositoryError> {
        Ok(lock(&self.items)
            .iter()
            .any(|i| i.user_id == user_id && i.product_id == product_id))
    }

    async fn count(&self, user_id: i64) -> Result<i64, RepositoryError> {
        Ok(lock(&self.items)
            .iter()
            .filter(|i| i.user_id == user_id)
            .count() as i64)
    }

    async fn clear(&self, user_id: i64) -> Result<u64, RepositoryError> {
        let mut items = lock(&self.items);
        let before = items.len();
        items.retain(|i| i.user_id != user_id);
        Ok((before - items.len()) as u64)
    }

    async fn paginate(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<WishlistItem>, RepositoryError> {
        Ok(paginate(&self.for_user(user_id), page))
    }

    async fn all(&self, user_id: i64) -> Result<Vec<WishlistItem>, RepositoryError> {
        Ok(self.for_user(user_id))
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    entries: Mutex<Vec<NewAuditLog>>,
}

impl InMemoryAuditRepository {
    pub fn entries(&self) -> Vec<NewAuditLog> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn insert(&self, entry: &NewAuditLog) -> Result<(), RepositoryError> {
        lock(&self.entries).push(entry.clone());
        Ok(())
    }

    async fn for_model(
        &self,
        model_type: &str,
        model_id: i64,
    ) -> Result<Vec<AuditLog>, RepositoryError> {
        Ok(lock(&self.entries)
            .iter()
            .enumerate()
            .filter(|(_, e)| e.model_type == model_type && e.model_id == model_id)
            .map(|(i, e)| AuditLog {
                id: i as i64 + 1,
                model_type: e.model_type.clone(),
                model_id: e.model_id,
                user_id: e.user_id,
                event: e.event,
                old_values: e.old_values.clone(),
                new_values: e.new_values.clone(),
                ip_address: e.ip_address.clone(),
                user_agent: e.user_agent.clone(),
                url: e.url.clone(),
                trace_id: e.trace_id.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

/// Gateway double handing out `fake-token-N`, or rejecting every request
/// once [`FakeGateway::reject_with`] was called.
#[derive(Default)]
pub struct FakeGateway {
    requests: Mutex<Vec<TokenRequest>>,
    rejection: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn reject_with(&self, reason: &str) {
        *lock(&self.rejection) = Some(reason.to_string());
    }

    pub fn requests(&self) -> Vec<TokenRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn request_token(&self, req: &TokenRequest) -> Result<String, GatewayError> {
        let count = {
            let mut requests = lock(&self.requests);
            requests.push(req.clone());
            requests.len()
        };
        match lock(&self.rejection).clone() {
            Some(reason) => Err(GatewayError::Rejected {
                response: json!({ "status": "failed", "reason": reason }),
                reason,
            }),
            None => Ok(format!("fake-token-{count}")),
        }
    }

    fn iframe_url(&self, token: &str) -> String {
        format!("{}{token}", paytr_settings().iframe_url)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    envelopes: Mutex<Vec<EventEnvelope>>,
}

impl RecordingPublisher {
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        lock(&self.envelopes).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.envelopes).iter().map(|e| e.event.name()).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        lock(&self.envelopes).push(envelope.clone());
        Ok(())
    }
}

/// Shared fakes plus constructors for every service.
pub struct Harness {
    pub users: Arc<InMemoryUsersRepository>,
    pub tokens: Arc<InMemoryTokensRepository>,
    pub categories_repo: Arc<InMemoryCategoriesRepository>,
    pub products_repo: Arc<InMemoryProductsRepository>,
    pub orders_repo: Arc<InMemoryOrdersRepository>,
    pub payments_repo: Arc<InMemoryPaymentsRepository>,
    pub wishlist_repo: Arc<InMemoryWishlistRepository>,
    pub audit: Arc<InMemoryAuditRepository>,
    pub events: Arc<RecordingPublisher>,
    pub gateway: Arc<FakeGateway>,
    pub cache: CatalogCache,
    pub signer: PayTrSigner,
    pub shop: ShopSettings,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let categories_repo = Arc::new(InMemoryCategoriesRepository::default());
        let products_repo = Arc::new(InMemoryProductsRepository::new(categories_repo.clone()));
        Self {
            users: Arc::new(InMemoryUsersRepository::default()),
            tokens: Arc::new(InMemoryTokensRepository::default()),
            orders_repo: Arc::new(InMemoryOrdersRepository::new(products_repo.clone())),
            payments_repo: Arc::new(InMemoryPaymentsRepository::default()),
            wishlist_repo: Arc::new(InMemoryWishlistRepository::new(products_repo.clone())),
            audit: Arc::new(InMemoryAuditRepository::default()),
            events: Arc::new(RecordingPublisher::default()),
            gateway: Arc::new(FakeGateway::default()),
            cache: CatalogCache::new(Duration::from_secs(60)),
            signer: PayTrSigner::new(&paytr_settings()),
            shop: ShopSettings::default(),
            categories_repo,
            products_repo,
        }
    }

    pub fn audit_logger(&self) -> AuditLogger {
        AuditLogger::new(self.audit.clone())
    }

    pub fn auth(&self) -> AuthService {
        AuthService::new(
            self.users.clone(),
            self.tokens.clone(),
            self.audit_logger(),
            self.events.clone(),
        )
    }

    pub fn products(&self) -> ProductService {
        ProductService::new(
            self.products_repo.clone(),
            self.categories_repo.clone(),
            self.cache.clone(),
            self.audit_logger(),
            self.events.clone(),
        )
    }

    pub fn categories(&self) -> CategoryService {
        CategoryService::new(self.categories_repo.clone(), self.cache.clone())
    }

    pub fn orders(&self) -> OrderServiceImpl {
        OrderServiceImpl::new(
            self.orders_repo.clone(),
            self.products_repo.clone(),
            self.cache.clone(),
            self.audit_logger(),
            self.events.clone(),
            self.shop.clone(),
        )
    }

    pub fn payments(&self) -> PaymentService {
        PaymentService::new(
            self.payments_repo.clone(),
            Arc::new(self.orders()),
            self.gateway.clone(),
            self.signer.clone(),
            self.audit_logger(),
            self.events.clone(),
        )
    }

    pub fn wishlist(&self) -> WishlistService {
        WishlistService::new(self.wishlist_repo.clone(), self.products_repo.clone())
    }
}
