//! # Data Repository Layer
//!
//! This module provides repository traits and PostgreSQL implementations
//! for every storefront aggregate: users and tokens, catalog, orders,
//! payments, wishlists and the audit trail.
//!
//! Each Postgres repository owns a clone of the connection [`Pool`]. Operations
//! that touch several rows (order placement, cancellation, category sync) run
//! inside a single transaction and roll back when any statement fails.
//!
//! [`Pool`]: deadpool_postgres::Pool

use thiserror::Error;
use tokio_postgres::error::SqlState;

mod audit;
mod categories;
mod orders;
mod payments;
mod products;
mod tokens;
mod users;
mod wishlist;

pub use audit::{AuditRepository, PgAuditRepository};
pub use categories::{CategoriesRepository, PgCategoriesRepository};
pub use orders::{OrdersRepository, PgOrdersRepository};
pub use payments::{PaymentsRepository, PgPaymentsRepository};
pub use products::{PgProductsRepository, ProductsRepository};
pub use tokens::{PgTokensRepository, TokensRepository};
pub use users::{PgUsersRepository, UsersRepository};
pub use wishlist::{PgWishlistRepository, WishlistRepository};

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(tokio_postgres::Error),
    /// Failed to obtain a connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A unique constraint rejected the write. Carries the constraint name.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),
    /// A conditional stock decrement matched no row.
    #[error("Insufficient stock for product {product_id}: {available} available")]
    InsufficientStock { product_id: i64, available: i32 },
    /// The row was not in the state the write required.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<tokio_postgres::Error> for RepositoryError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            let constraint = err
                .as_db_error()
                .and_then(|db| db.constraint())
                .unwrap_or("unknown")
                .to_string();
            return Self::UniqueViolation(constraint);
        }
        Self::Db(err)
    }
}
