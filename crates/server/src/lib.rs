//! HTTP API of the storefront.
//!
//! Every route except `/metrics` lives under `/api`. Handlers answer with the
//! [`ApiResponse`] envelope, failures go through [`ApiError`], and every
//! request runs inside a [`service::RequestContext`] installed by
//! [`middleware::trace_requests`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};

pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod requests;
pub mod resources;
pub mod response;
pub mod state;

pub use error::ApiError;
pub use metrics::Metrics;
pub use response::ApiResponse;
pub use state::{AppInfo, AppState, DatabaseProbe};

use handlers::{auth, categories, health, orders, payments, products, wishlist};

/// Server serves the storefront API on one port.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(port: u16, state: AppState) -> Self {
        info!(port, "Initializing HTTP server");
        Self { state, port }
    }

    /// Serves until `shutdown` is notified or a termination signal arrives.
    pub async fn start(&self, shutdown: Arc<Notify>) -> Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .context("Failed to bind to port")?;

        info!(port = self.port, "HTTP server listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.notified() => {},
                _ = shutdown_signal() => {},
            }
        })
        .await
        .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// The full application router with middleware applied.
pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-email/{token}", get(auth::verify_email))
        .route("/auth/resend-verification", post(auth::resend_verification))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/categories", get(categories::index))
        .route("/categories/{id}", get(categories::show))
        .route("/categories/slug/{slug}", get(categories::show_by_slug))
        .route("/products", get(products::index).post(products::store))
        .route(
            "/products/{id}",
            get(products::show)
                .put(products::update)
                .patch(products::update)
                .delete(products::destroy),
        )
        .route("/products/slug/{slug}", get(products::show_by_slug))
        .route("/orders", get(orders::index).post(orders::store))
        .route("/orders/{id}", get(orders::show))
        .route("/orders/{id}/cancel", post(orders::cancel))
        .route(
            "/wishlist",
            get(wishlist::index)
                .post(wishlist::store)
                .delete(wishlist::clear),
        )
        .route("/wishlist/toggle", post(wishlist::toggle))
        .route("/wishlist/count", get(wishlist::count))
        .route("/wishlist/check/{product}", get(wishlist::check))
        .route("/wishlist/{product}", axum::routing::delete(wishlist::destroy))
        .route("/payments/initiate", post(payments::initiate))
        .route("/payments/notify", post(payments::notify))
        .route("/payments/{merchant_oid}/status", get(payments::status));

    let api = Router::new()
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::detailed))
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .nest("/v1", v1);

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(health::metrics))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(from_fn_with_state(
            state.metrics.clone(),
            middleware::track_metrics,
        ))
        .layer(from_fn_with_state(state.clone(), middleware::trace_requests))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::NotFound(extract::NOT_FOUND.into())
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Waits for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
