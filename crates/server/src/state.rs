use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cache::CatalogCache;
use deadpool_postgres::Pool;
use service::{
    AuthService, CategoryService, OrderService, PaymentService, ProductService, WishlistService,
};

use crate::metrics::Metrics;

/// Round trip check used by the readiness and detailed health probes.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn ping(&self) -> anyhow::Result<Duration>;
}

#[async_trait]
impl DatabaseProbe for Pool {
    async fn ping(&self) -> anyhow::Result<Duration> {
        db::ping(self).await
    }
}

/// Values reported by the health endpoints and used to build absolute links.
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfo {
    pub name: String,
    pub env: String,
    pub debug: bool,
    pub version: String,
    /// Base URL without a trailing slash.
    pub url: String,
}

impl AppInfo {
    pub fn new(
        name: impl Into<String>,
        env: impl Into<String>,
        debug: bool,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
            debug,
            version: env!("CARGO_PKG_VERSION").to_string(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Application state shared between request handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub products: Arc<ProductService>,
    pub categories: Arc<CategoryService>,
    pub orders: Arc<dyn OrderService>,
    pub payments: Arc<PaymentService>,
    pub wishlist: Arc<WishlistService>,
    pub cache: CatalogCache,
    pub database: Arc<dyn DatabaseProbe>,
    pub metrics: Arc<Metrics>,
    pub info: Arc<AppInfo>,
}
