use std::fmt;

use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::money::format_amount;

/// Gateway-side state of a payment attempt. Also used for `orders.payment_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "payment_status")]
pub enum PaymentStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "processing")]
    Processing,
    #[postgres(name = "completed")]
    Completed,
    #[postgres(name = "failed")]
    Failed,
    #[postgres(name = "refunded")]
    Refunded,
    #[postgres(name = "cancelled")]
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Beklemede",
            Self::Processing => "İşleniyor",
            Self::Completed => "Tamamlandı",
            Self::Failed => "Başarısız",
            Self::Refunded => "İade Edildi",
            Self::Cancelled => "İptal Edildi",
        }
    }

    /// A final payment never accepts another gateway notification.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Refunded | Self::Cancelled
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub order_id: Option<i64>,
    pub merchant_oid: String,
    pub payment_provider: String,
    pub payment_method: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub paytr_token: Option<String>,
    pub transaction_id: Option<String>,
    pub masked_pan: Option<String>,
    pub installment_count: Option<i32>,
    pub provider_response: Option<Value>,
    pub error_message: Option<String>,
    pub terms_accepted: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub terms_acceptance_ip: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    pub fn formatted_amount(&self) -> String {
        format_amount(self.amount, &self.currency)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub user_id: i64,
    pub order_id: Option<i64>,
    pub merchant_oid: String,
    pub payment_provider: String,
    pub amount: i64,
    pub currency: String,
    pub terms_accepted: bool,
    pub terms_accepted_at: Option<DateTime<Utc>>,
    pub terms_acceptance_ip: Option<String>,
}
