//! Domain events published to the event bus and consumed by background jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    UserRegistered {
        user_id: i64,
        name: String,
        email: String,
        verification_token: String,
    },
    VerificationRequested {
        user_id: i64,
        name: String,
        email: String,
        verification_token: String,
    },
    ProductCreated {
        product_id: i64,
        sku: String,
    },
    ProductUpdated {
        product_id: i64,
        changed: Vec<String>,
    },
    ProductDeleted {
        product_id: i64,
        uuid: Uuid,
        sku: String,
    },
    OrderPlaced {
        order_id: i64,
        order_number: String,
        user_id: i64,
        total_amount: i64,
    },
    OrderCancelled {
        order_id: i64,
        order_number: String,
    },
    PaymentCompleted {
        payment_id: i64,
        order_id: Option<i64>,
        merchant_oid: String,
    },
    PaymentFailed {
        payment_id: i64,
        merchant_oid: String,
        reason: String,
    },
}

impl DomainEvent {
    /// Name of the event as written in the `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserRegistered { .. } => "user_registered",
            Self::VerificationRequested { .. } => "verification_requested",
            Self::ProductCreated { .. } => "product_created",
            Self::ProductUpdated { .. } => "product_updated",
            Self::ProductDeleted { .. } => "product_deleted",
            Self::OrderPlaced { .. } => "order_placed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::PaymentCompleted { .. } => "payment_completed",
            Self::PaymentFailed { .. } => "payment_failed",
        }
    }

    /// Partition key: events of one aggregate stay ordered.
    pub fn key(&self) -> String {
        match self {
            Self::UserRegistered { user_id, .. } | Self::VerificationRequested { user_id, .. } => {
                format!("user-{user_id}")
            }
            Self::ProductCreated { product_id, .. }
            | Self::ProductUpdated { product_id, .. }
            | Self::ProductDeleted { product_id, .. } => format!("product-{product_id}"),
            Self::OrderPlaced { order_id, .. } | Self::OrderCancelled { order_id, .. } => {
                format!("order-{order_id}")
            }
            Self::PaymentCompleted { merchant_oid, .. } | Self::PaymentFailed { merchant_oid, .. } => {
                format!("payment-{merchant_oid}")
            }
        }
    }
}

/// Wire format of an event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_envelope_from_json() {
        let json = r#"
        {
            "event_id": "7f0b3c9e-2d7a-4b8e-9a55-0d6c1c1f3e21",
            "occurred_at": "2025-11-28T10:15:00Z",
            "type": "user_registered",
            "user_id": 42,
            "name": "Zeynep Kaya",
            "email": "zeynep@example.com",
            "verification_token": "tok"
        }
        "#;
        let envelope: EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.event.name(), "user_registered");
        assert_eq!(envelope.event.key(), "user-42");
        match envelope.event {
            DomainEvent::UserRegistered { email, .. } => assert_eq!(email, "zeynep@example.com"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_type_tag_matches_name() {
        let event = DomainEvent::OrderCancelled {
            order_id: 5,
            order_number: "ORD-ABCDEFGH-1".into(),
        };
        let value = serde_json::to_value(EventEnvelope::new(event.clone())).unwrap();
        assert_eq!(value["type"], event.name());
        assert_eq!(value["order_id"], 5);
    }
}
