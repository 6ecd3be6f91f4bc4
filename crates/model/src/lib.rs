//! Domain types shared by every layer of the storefront backend.
//!
//! All monetary amounts are `i64` minor units of the order currency.

pub mod audit;
pub mod catalog;
pub mod events;
pub mod money;
pub mod order;
pub mod pagination;
pub mod payment;
pub mod user;
pub mod wishlist;

pub use audit::{AuditEvent, AuditLog, NewAuditLog};
pub use catalog::{
    Category, CategoryParent, NewProduct, Product, ProductChanges, ProductFilter, ProductSort,
    SortOrder,
};
pub use events::{DomainEvent, EventEnvelope};
pub use money::{format_amount, format_decimal};
pub use order::{Address, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};
pub use pagination::{Page, PageRequest};
pub use payment::{NewPayment, Payment, PaymentStatus};
pub use user::{AccessToken, NewUser, User};
pub use wishlist::WishlistItem;
