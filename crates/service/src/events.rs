//! Outbound domain events.

use async_trait::async_trait;
use model::{DomainEvent, EventEnvelope};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to deliver event: {0}")]
    Delivery(String),
}

/// Sink for domain events. Implemented by the Kafka producer.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError>;
}

/// Publisher used when the event bus is disabled. Events are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

#[async_trait]
impl EventPublisher for NullPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), PublishError> {
        debug!(
            event = envelope.event.name(),
            key = %envelope.event.key(),
            "Event bus disabled, dropping event"
        );
        Ok(())
    }
}

/// Wraps `event` in an envelope and publishes it. Failures are logged only.
pub(crate) async fn publish(publisher: &dyn EventPublisher, event: DomainEvent) {
    let envelope = EventEnvelope::new(event);
    if let Err(err) = publisher.publish(&envelope).await {
        warn!(
            event = envelope.event.name(),
            event_id = %envelope.event_id,
            error = %err,
            "Failed to publish domain event"
        );
    }
}
