//! Business logic layer of the storefront.
//!
//! Every service owns its collaborators behind `Arc<dyn ...>` so the HTTP
//! layer, the job worker and the tests can wire real Postgres repositories
//! or in-memory fakes. Services never see HTTP types: the caller's identity
//! is passed explicitly and request metadata for the audit trail is read from
//! the ambient [`RequestContext`].
//!
//! Side effects that must not fail a business operation (audit writes,
//! domain event publishing) are logged and swallowed.

use std::collections::BTreeMap;

use repository::RepositoryError;
use thiserror::Error;

pub mod audit;
pub mod auth;
pub mod catalog;
pub mod context;
pub mod events;
pub mod orders;
pub mod payments;
pub mod paytr;
pub mod wishlist;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use audit::{Auditable, AuditLogger};
pub use auth::{AuthService, AuthSession, Authenticated, RegisterInput};
pub use catalog::{CategoryService, ProductService};
pub use context::RequestContext;
pub use events::{EventPublisher, NullPublisher, PublishError};
pub use orders::{OrderLine, OrderService, OrderServiceImpl, PlaceOrder};
pub use payments::{NotificationOutcome, PaymentInitiation, PaymentService};
pub use paytr::{GatewayError, PayTrClient, PayTrSigner, PaymentGateway};
pub use wishlist::{ToggleResult, WishlistService};

/// Field name to messages, rendered as the `errors` object of a 422 response.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// The main error type for all service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("The given data was invalid.")]
    Validation(FieldErrors),
    #[error("The email has already been taken.")]
    EmailAlreadyExists,
    #[error("The provided credentials are incorrect.")]
    InvalidCredentials,
    #[error("Email address {0} is not verified.")]
    EmailNotVerified(String),
    #[error("User not found.")]
    UserNotFound,
    #[error("Invalid or expired verification token.")]
    InvalidVerificationToken,
    #[error("Email address is already verified.")]
    EmailAlreadyVerified,
    #[error("Unauthenticated.")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("Product not found.")]
    ProductNotFound,
    #[error("Category not found.")]
    CategoryNotFound,
    #[error("The sku has already been taken.")]
    DuplicateSku,
    #[error("The slug has already been taken.")]
    DuplicateSlug,
    #[error("Cart is empty.")]
    EmptyCart,
    #[error("Insufficient stock for {name}: requested {requested}, available {available}.")]
    InsufficientStock {
        product_id: i64,
        name: String,
        requested: i32,
        available: i32,
    },
    #[error("Order not found.")]
    OrderNotFound,
    #[error("Order {order_number} cannot be cancelled in status {status}.")]
    OrderCannotBeCancelled {
        order_id: i64,
        order_number: String,
        status: model::OrderStatus,
    },
    #[error("Order has already been paid.")]
    OrderAlreadyPaid,
    #[error("Payment not found.")]
    PaymentNotFound,
    #[error("Payment failed: {0}")]
    PaymentFailed(String),
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(#[from] RepositoryError),
    /// Some unexpected or unhandled error.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ServiceError {
    /// A validation failure on a single field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::Validation(errors)
    }
}
