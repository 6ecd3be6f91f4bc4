//! Kafka publisher for storefront domain events.
//!
//! Every [`DomainEvent`] is wrapped in an [`EventEnvelope`], serialized to
//! JSON and written to the events topic keyed by its aggregate, so events of
//! one user, product, order or payment keep their relative order.

use std::time::Duration;

use anyhow::{Context, Result};
use app_config::AppConfig;
use async_trait::async_trait;
use model::EventEnvelope;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use service::{EventPublisher, PublishError};
use tracing::{debug, error, info};

/// How long a record may wait in the local queue before the send fails.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// A record ready to be handed to the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEvent {
    pub key: String,
    pub payload: String,
}

/// Serializes an envelope into its partition key and JSON payload.
pub fn encode(envelope: &EventEnvelope) -> Result<EncodedEvent, PublishError> {
    Ok(EncodedEvent {
        key: envelope.event.key(),
        payload: serde_json::to_string(envelope)?,
    })
}

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    /// Creates a producer for the configured brokers and events topic.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.kafka_brokers.join(","))
            .set("message.timeout.ms", "5000")
            .create()
            .context("Failed to create Kafka producer")?;

        info!(
            topic = %config.kafka_events_topic,
            "Kafka producer initialized"
        );

        Ok(Self {
            producer,
            topic: config.kafka_events_topic.clone(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let encoded = encode(envelope)?;
        let record = FutureRecord::to(&self.topic)
            .key(&encoded.key)
            .payload(&encoded.payload);

        match self.producer.send(record, QUEUE_TIMEOUT).await {
            Ok((partition, offset)) => {
                debug!(
                    event = envelope.event.name(),
                    key = %encoded.key,
                    partition,
                    offset,
                    "Event published"
                );
                Ok(())
            }
            Err((kafka_err, _)) => {
                error!(
                    event = envelope.event.name(),
                    error = %kafka_err,
                    "Failed to publish event to Kafka"
                );
                Err(PublishError::Delivery(kafka_err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::DomainEvent;
    use serde_json::Value;

    #[test]
    fn test_encode_keys_by_aggregate() {
        let envelope = EventEnvelope::new(DomainEvent::OrderPlaced {
            order_id: 17,
            order_number: "ORD-K3J9QX2A-1700000000".into(),
            user_id: 4,
            total_amount: 35_880,
        });

        let encoded = encode(&envelope).unwrap();
        assert_eq!(encoded.key, "order-17");

        let payload: Value = serde_json::from_str(&encoded.payload).unwrap();
        assert_eq!(payload["type"], "order_placed");
        assert_eq!(payload["total_amount"], 35_880);
        assert_eq!(payload["event_id"], envelope.event_id.to_string());
    }

    #[test]
    fn test_payload_decodes_back_to_envelope() {
        let envelope = EventEnvelope::new(DomainEvent::UserRegistered {
            user_id: 42,
            name: "Zeynep Kaya".into(),
            email: "zeynep@example.com".into(),
            verification_token: "abc".into(),
        });

        let encoded = encode(&envelope).unwrap();
        let decoded: EventEnvelope = serde_json::from_str(&encoded.payload).unwrap();
        assert_eq!(decoded, envelope);
    }
}
