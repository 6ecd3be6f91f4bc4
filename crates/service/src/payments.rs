//! Payment initiation and PayTR webhook handling.
//!
//! A payment moves `pending -> processing` when the gateway hands out a
//! token, and `processing -> completed | failed` when the signed
//! notification arrives. Transitions out of an open state are conditional
//! updates, so duplicate notifications resolve to
//! [`NotificationOutcome::AlreadyProcessed`].

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use model::{format_decimal, DomainEvent, NewPayment, Order, Payment, User};
use rand::Rng;
use rand::distributions::Alphanumeric;
use repository::PaymentsRepository;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};

use crate::ServiceError;
use crate::audit::AuditLogger;
use crate::events::{self, EventPublisher};
use crate::orders::OrderService;
use crate::paytr::{PayTrSigner, PaymentGateway, TokenRequest};

pub const PROVIDER: &str = "paytr";
const SHIPPING_LINE: &str = "Kargo Ücreti";
const DEFAULT_ADDRESS: &str = "Adres belirtilmedi";
const DEFAULT_PHONE: &str = "0000000000";
const DEFAULT_FAILURE: &str = "Ödeme başarısız";

/// Result of processing one gateway notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    Success,
    Failed,
    HashMismatch,
    NotFound,
    AlreadyProcessed,
}

impl NotificationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::HashMismatch => "hash_mismatch",
            Self::NotFound => "not_found",
            Self::AlreadyProcessed => "already_processed",
        }
    }
}

/// Handed back to the client to open the hosted payment page.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentInitiation {
    pub token: String,
    pub merchant_oid: String,
    pub payment_id: i64,
    pub iframe_url: String,
}

pub struct PaymentService {
    payments: Arc<dyn PaymentsRepository>,
    orders: Arc<dyn OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    signer: PayTrSigner,
    audit: AuditLogger,
    events: Arc<dyn EventPublisher>,
}

impl PaymentService {
    pub fn new(
        payments: Arc<dyn PaymentsRepository>,
        orders: Arc<dyn OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        signer: PayTrSigner,
        audit: AuditLogger,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            payments,
            orders,
            gateway,
            signer,
            audit,
            events,
        }
    }

    /// Opens a payment attempt for `order_id` and obtains the iframe token.
    #[instrument(skip(self, user, user_ip), fields(user_id = user.id))]
    pub async fn initiate(
        &self,
        user: &User,
        order_id: i64,
        user_ip: &str,
        terms_accepted: bool,
    ) -> Result<PaymentInitiation, ServiceError> {
        let order = self.orders.find_by_id(order_id).await?;
        if !order.belongs_to(user.id) {
            return Err(ServiceError::Forbidden(
                "You do not have permission to pay for this order".to_string(),
            ));
        }
        if order.is_paid() {
            return Err(ServiceError::OrderAlreadyPaid);
        }

        let merchant_oid = generate_merchant_oid(user.id);
        let payment = self
            .payments
            .create(&NewPayment {
                user_id: user.id,
                order_id: Some(order.id),
                merchant_oid: merchant_oid.clone(),
                payment_provider: PROVIDER.to_string(),
                amount: order.total_amount,
                currency: order.currency.clone(),
                terms_accepted,
                terms_accepted_at: Some(Utc::now()),
                terms_acceptance_ip: Some(user_ip.to_string()),
            })
            .await?;
        self.audit.created(&payment).await;

        let request = TokenRequest {
            merchant_oid: merchant_oid.clone(),
            user_ip: user_ip.to_string(),
            email: user.email.clone(),
            payment_amount: order.total_amount,
            user_basket: encode_basket(&order),
            currency: order.currency.clone(),
            user_name: user.name.clone(),
            user_address: order
                .shipping
                .address
                .clone()
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            user_phone: order
                .shipping
                .phone
                .clone()
                .unwrap_or_else(|| DEFAULT_PHONE.to_string()),
        };

        let token = match self.gateway.request_token(&request).await {
            Ok(token) => token,
            Err(err) => {
                let reason = err.reason();
                error!(merchant_oid = %merchant_oid, error = %reason, "PayTR token request failed");
                if let Some(failed) = self
                    .payments
                    .fail_if_open(payment.id, &reason, err.response())
                    .await?
                {
                    self.audit.updated(&payment, &failed).await;
                }
                return Err(ServiceError::PaymentFailed(reason));
            }
        };

        let processing = self.payments.mark_processing(payment.id, &token).await?;
        self.audit.updated(&payment, &processing).await;
        info!(
            payment_id = payment.id,
            merchant_oid = %merchant_oid,
            amount = order.total_amount,
            "Payment initiated"
        );

        Ok(PaymentInitiation {
            iframe_url: self.gateway.iframe_url(&token),
            token,
            merchant_oid,
            payment_id: payment.id,
        })
    }

    /// Applies a PayTR callback. Never fails on business outcomes; errors are
    /// reserved for infrastructure failures.
    #[instrument(skip_all)]
    pub async fn handle_notification(
        &self,
        data: &HashMap<String, String>,
    ) -> Result<NotificationOutcome, ServiceError> {
        let field = |name: &str| data.get(name).map(String::as_str).unwrap_or_default();
        let merchant_oid = field("merchant_oid");
        let status = field("status");
        let total_amount = parse_amount(field("total_amount"));

        if !self
            .signer
            .verify_notification(merchant_oid, status, total_amount, field("hash"))
        {
            warn!(merchant_oid, "PayTR notification hash mismatch");
            return Ok(NotificationOutcome::HashMismatch);
        }

        let Some(payment) = self.payments.find_by_merchant_oid(merchant_oid).await? else {
            warn!(merchant_oid, "PayTR notification for unknown payment");
            return Ok(NotificationOutcome::NotFound);
        };
        if payment.status.is_final() {
            info!(payment_id = payment.id, status = %payment.status, "Notification already processed");
            return Ok(NotificationOutcome::AlreadyProcessed);
        }

        let raw = json!(data);
        if status == "success" {
            let Some(completed) = self
                .payments
                .complete_if_open(payment.id, merchant_oid, &raw)
                .await?
            else {
                return Ok(NotificationOutcome::AlreadyProcessed);
            };
            self.audit.updated(&payment, &completed).await;
            if let Some(order_id) = completed.order_id {
                self.orders.mark_as_paid(order_id).await?;
            }
            events::publish(
                self.events.as_ref(),
                DomainEvent::PaymentCompleted {
                    payment_id: completed.id,
                    order_id: completed.order_id,
                    merchant_oid: completed.merchant_oid.clone(),
                },
            )
            .await;
            info!(payment_id = completed.id, amount = completed.amount, "Payment completed");
            return Ok(NotificationOutcome::Success);
        }

        let reason = data
            .get("failed_reason_msg")
            .filter(|msg| !msg.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
        let Some(failed) = self
            .payments
            .fail_if_open(payment.id, &reason, Some(&raw))
            .await?
        else {
            return Ok(NotificationOutcome::AlreadyProcessed);
        };
        self.audit.updated(&payment, &failed).await;
        events::publish(
            self.events.as_ref(),
            DomainEvent::PaymentFailed {
                payment_id: failed.id,
                merchant_oid: failed.merchant_oid.clone(),
                reason: reason.clone(),
            },
        )
        .await;
        warn!(
            payment_id = failed.id,
            reason_code = field("failed_reason_code"),
            reason_msg = %reason,
            "Payment failed"
        );
        Ok(NotificationOutcome::Failed)
    }

    /// Payment of `merchant_oid`, visible to its owner only.
    pub async fn status(&self, merchant_oid: &str, user_id: i64) -> Result<Payment, ServiceError> {
        let payment = self
            .payments
            .find_by_merchant_oid(merchant_oid)
            .await?
            .ok_or(ServiceError::PaymentNotFound)?;
        if payment.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "You do not have permission to view this payment".to_string(),
            ));
        }
        Ok(payment)
    }
}

/// `ORD` + 8 upper-case alphanumerics + user id + unix seconds.
pub fn generate_merchant_oid(user_id: i64) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("ORD{random}{user_id}{}", Utc::now().timestamp())
}

/// Base64 JSON basket of `[name, unit price, quantity]` rows.
pub fn encode_basket(order: &Order) -> String {
    let mut basket: Vec<Value> = order
        .items
        .iter()
        .map(|item| json!([item.product_name, format_decimal(item.unit_price), item.quantity]))
        .collect();
    if order.shipping_amount > 0 {
        basket.push(json!([SHIPPING_LINE, format_decimal(order.shipping_amount), 1]));
    }
    STANDARD.encode(Value::Array(basket).to_string())
}

/// PayTR posts amounts as integers but tolerate a decimal point.
fn parse_amount(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|v| v as i64))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderLine, PlaceOrder};
    use crate::testing::{Harness, sample_product, sample_user};
    use model::{Address, PaymentStatus};

    async fn order_for(h: &Harness, user_id: i64) -> Order {
        h.products_repo.insert(sample_product(1, 10_000, 10));
        h.orders()
            .create_order(PlaceOrder {
                user_id,
                items: vec![OrderLine {
                    product_id: 1,
                    quantity: 2,
                }],
                shipping: Address {
                    address: Some("Atatürk Bulvarı 1".into()),
                    country: "TR".into(),
                    ..Default::default()
                },
                billing: None,
                notes: None,
                currency: None,
            })
            .await
            .unwrap()
    }

    fn notification(h: &Harness, oid: &str, status: &str, amount: i64) -> HashMap<String, String> {
        let hash = h.signer.notification_signature(oid, status, amount);
        HashMap::from([
            ("merchant_oid".to_string(), oid.to_string()),
            ("status".to_string(), status.to_string()),
            ("total_amount".to_string(), amount.to_string()),
            ("hash".to_string(), hash),
        ])
    }

    #[test]
    fn test_merchant_oid_is_alphanumeric() {
        let oid = generate_merchant_oid(42);
        assert!(oid.starts_with("ORD"));
        assert!(oid.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(oid[3..11].chars().all(|c| !c.is_ascii_lowercase()));
        assert!(oid[11..].starts_with("42"));
    }

    #[test]
    fn test_basket_includes_shipping_line() {
        let mut order = crate::testing::sample_order(1, 1);
        order.shipping_amount = 2_990;
        let decoded = STANDARD.decode(encode_basket(&order)).unwrap();
        let basket: Value = serde_json::from_slice(&decoded).unwrap();
        let rows = basket.as_array().unwrap();
        assert_eq!(rows.last().unwrap(), &json!(["Kargo Ücreti", "29.90", 1]));
        assert_eq!(rows[0][1], json!("100.00"));
    }

    #[tokio::test]
    async fn test_initiate_marks_processing() {
        let h = Harness::new();
        let user = sample_user(5, "buyer@example.com");
        let order = order_for(&h, user.id).await;

        let init = h.payments().initiate(&user, order.id, "10.0.0.5", true).await.unwrap();
        assert_eq!(init.token, "fake-token-1");
        assert!(init.iframe_url.ends_with("fake-token-1"));

        let payment = h.payments_repo.get(init.payment_id).unwrap();
        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(payment.amount, order.total_amount);
        assert_eq!(payment.terms_acceptance_ip.as_deref(), Some("10.0.0.5"));

        let request = h.gateway.requests().pop().unwrap();
        assert_eq!(request.payment_amount, order.total_amount);
        assert_eq!(request.user_address, "Atatürk Bulvarı 1");
        assert_eq!(request.user_phone, "0000000000");
    }

    #[tokio::test]
    async fn test_initiate_rejects_foreign_and_paid_orders() {
        let h = Harness::new();
        let owner = sample_user(5, "owner@example.com");
        let order = order_for(&h, owner.id).await;

        let stranger = sample_user(6, "stranger@example.com");
        assert!(matches!(
            h.payments().initiate(&stranger, order.id, "10.0.0.6", true).await,
            Err(ServiceError::Forbidden(_))
        ));

        h.orders().mark_as_paid(order.id).await.unwrap();
        assert!(matches!(
            h.payments().initiate(&owner, order.id, "10.0.0.5", true).await,
            Err(ServiceError::OrderAlreadyPaid)
        ));
    }

    #[tokio::test]
    async fn test_gateway_rejection_fails_payment() {
        let h = Harness::new();
        h.gateway.reject_with("Geçersiz mağaza");
        let user = sample_user(5, "buyer@example.com");
        let order = order_for(&h, user.id).await;

        let err = h.payments().initiate(&user, order.id, "10.0.0.5", true).await.unwrap_err();
        assert!(matches!(err, ServiceError::PaymentFailed(ref r) if r == "Geçersiz mağaza"));

        let payment = h.payments_repo.all().pop().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert_eq!(payment.error_message.as_deref(), Some("Geçersiz mağaza"));
    }

    #[tokio::test]
    async fn test_success_notification_is_idempotent() {
        let h = Harness::new();
        let user = sample_user(5, "buyer@example.com");
        let order = order_for(&h, user.id).await;
        let init = h.payments().initiate(&user, order.id, "10.0.0.5", true).await.unwrap();

        let fields = notification(&h, &init.merchant_oid, "success", order.total_amount);
        let first = h.payments().handle_notification(&fields).await.unwrap();
        let second = h.payments().handle_notification(&fields).await.unwrap();

        assert_eq!(first, NotificationOutcome::Success);
        assert_eq!(second, NotificationOutcome::AlreadyProcessed);
        assert!(h.orders().find_by_id(order.id).await.unwrap().is_paid());
        assert_eq!(
            h.events.names().iter().filter(|n| **n == "payment_completed").count(),
            1
        );
        let payment = h.payments_repo.get(init.payment_id).unwrap();
        assert_eq!(payment.transaction_id.as_deref(), Some(init.merchant_oid.as_str()));
    }

    #[tokio::test]
    async fn test_failed_notification_uses_default_reason() {
        let h = Harness::new();
        let user = sample_user(5, "buyer@example.com");
        let order = order_for(&h, user.id).await;
        let init = h.payments().initiate(&user, order.id, "10.0.0.5", true).await.unwrap();

        let fields = notification(&h, &init.merchant_oid, "failed", order.total_amount);
        let outcome = h.payments().handle_notification(&fields).await.unwrap();

        assert_eq!(outcome, NotificationOutcome::Failed);
        let payment = h.payments_repo.get(init.payment_id).unwrap();
        assert_eq!(payment.error_message.as_deref(), Some("Ödeme başarısız"));
        assert!(!h.orders().find_by_id(order.id).await.unwrap().is_paid());
    }

    #[tokio::test]
    async fn test_bad_hash_and_unknown_oid() {
        let h = Harness::new();
        let mut fields = notification(&h, "ORDUNKNOWN", "success", 100);
        assert_eq!(
            h.payments().handle_notification(&fields).await.unwrap(),
            NotificationOutcome::NotFound
        );

        fields.insert("total_amount".into(), "101".into());
        assert_eq!(
            h.payments().handle_notification(&fields).await.unwrap(),
            NotificationOutcome::HashMismatch
        );
    }

    #[tokio::test]
    async fn test_status_is_owner_only() {
        let h = Harness::new();
        let user = sample_user(5, "buyer@example.com");
        let order = order_for(&h, user.id).await;
        let init = h.payments().initiate(&user, order.id, "10.0.0.5", true).await.unwrap();

        assert_eq!(
            h.payments().status(&init.merchant_oid, 5).await.unwrap().id,
            init.payment_id
        );
        assert!(matches!(
            h.payments().status(&init.merchant_oid, 6).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            h.payments().status("ORDNOPE", 5).await,
            Err(ServiceError::PaymentNotFound)
        ));
    }
}
