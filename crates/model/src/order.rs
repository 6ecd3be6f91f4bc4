use std::fmt;

use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

use crate::money::format_amount;
use crate::payment::PaymentStatus;

/// Lifecycle of an order. Stored as the `order_status` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "order_status")]
pub enum OrderStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "processing")]
    Processing,
    #[postgres(name = "paid")]
    Paid,
    #[postgres(name = "shipped")]
    Shipped,
    #[postgres(name = "delivered")]
    Delivered,
    #[postgres(name = "cancelled")]
    Cancelled,
    #[postgres(name = "refunded")]
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        Self::Pending,
        Self::Processing,
        Self::Paid,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
        Self::Refunded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Beklemede",
            Self::Processing => "İşleniyor",
            Self::Paid => "Ödendi",
            Self::Shipped => "Kargoya Verildi",
            Self::Delivered => "Teslim Edildi",
            Self::Cancelled => "İptal Edildi",
            Self::Refunded => "İade Edildi",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    pub fn can_be_cancelled(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Postal address snapshot stored on the order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

impl Address {
    /// Fills every missing field from `fallback`.
    pub fn or_else(self, fallback: &Address) -> Address {
        Address {
            name: self.name.or_else(|| fallback.name.clone()),
            phone: self.phone.or_else(|| fallback.phone.clone()),
            address: self.address.or_else(|| fallback.address.clone()),
            city: self.city.or_else(|| fallback.city.clone()),
            district: self.district.or_else(|| fallback.district.clone()),
            postal_code: self.postal_code.or_else(|| fallback.postal_code.clone()),
            country: if self.country.is_empty() {
                fallback.country.clone()
            } else {
                self.country
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub currency: String,
    pub shipping: Address,
    pub billing: Address,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Completed || self.status == OrderStatus::Paid
    }

    pub fn belongs_to(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }

    pub fn formatted_total(&self) -> String {
        format_amount(self.total_amount, &self.currency)
    }
}

/// Order line with a snapshot of the product at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_sku: String,
    pub product_description: Option<String>,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub order_number: String,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
    pub currency: String,
    pub shipping: Address,
    pub billing: Address,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub product_name: String,
    pub product_sku: String,
    pub product_description: Option<String>,
    pub product_image: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
}
