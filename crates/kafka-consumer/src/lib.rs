//! Kafka job worker.
//!
//! Reads [`EventEnvelope`]s from the events topic and runs the background
//! jobs they trigger. Registration and verification requests send the
//! welcome email; every other event is only logged.

use std::sync::Arc;

use anyhow::Result;
use model::{DomainEvent, EventEnvelope};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

pub mod jobs;
pub mod mail;

pub use jobs::{WelcomeEmail, WelcomeEmailJob};
pub use mail::{Email, LogMailer, MailError, Mailer};

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Ignored,
    Malformed,
}

/// Routes decoded events to their jobs.
///
/// Jobs run on their own tasks so a slow mailer never holds up the stream.
pub struct JobDispatcher {
    welcome: Arc<WelcomeEmailJob>,
    running: Mutex<JoinSet<()>>,
}

impl JobDispatcher {
    pub fn new(welcome: WelcomeEmailJob) -> Self {
        Self {
            welcome: Arc::new(welcome),
            running: Mutex::new(JoinSet::new()),
        }
    }

    async fn spawn(&self, job: WelcomeEmail) {
        let welcome = self.welcome.clone();
        let mut running = self.running.lock().await;
        while let Some(finished) = running.try_join_next() {
            if let Err(err) = finished {
                error!(error = %err, "Welcome email task failed");
            }
        }
        running.spawn(async move {
            // Failures are logged by the job after its final attempt.
            let _ = welcome.run(&job).await;
        });
    }

    /// Waits for every job still in flight.
    pub async fn drain(&self) {
        let mut running = self.running.lock().await;
        while let Some(finished) = running.join_next().await {
            if let Err(err) = finished {
                error!(error = %err, "Welcome email task failed");
            }
        }
    }

    pub async fn dispatch(&self, payload: &[u8]) -> Dispatch {
        let envelope: EventEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event payload");
                return Dispatch::Malformed;
            }
        };

        match envelope.event {
            DomainEvent::UserRegistered {
                user_id,
                name,
                email,
                verification_token,
            }
            | DomainEvent::VerificationRequested {
                user_id,
                name,
                email,
                verification_token,
            } => {
                self.spawn(WelcomeEmail {
                    user_id,
                    name,
                    email,
                    verification_token,
                })
                .await;
                Dispatch::Handled
            }
            other => {
                debug!(event = other.name(), event_id = %envelope.event_id, "No job for event");
                Dispatch::Ignored
            }
        }
    }
}

/// Wraps the underlying `StreamConsumer` and the job dispatcher.
pub struct EventConsumer {
    consumer: StreamConsumer,
    dispatcher: Arc<JobDispatcher>,
}

impl EventConsumer {
    /// Create a consumer subscribed to the events topic.
    pub fn new(
        brokers: &[String],
        topic: &str,
        group_id: &str,
        dispatcher: Arc<JobDispatcher>,
    ) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .create()?;

        consumer.subscribe(&[topic])?;
        info!(topic, group_id, "Kafka consumer subscribed");
        Ok(Self {
            consumer,
            dispatcher,
        })
    }

    /// Consumes until `shutdown` is notified or the stream ends, then waits
    /// for running jobs.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<()> {
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                maybe_msg = stream.next() => {
                    match maybe_msg {
                        Some(Ok(msg)) => self.handle_message(&msg).await,
                        Some(Err(e)) => error!(error = %e, "Kafka error"),
                        None => {
                            debug!("Kafka stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("Kafka consumer received shutdown signal");
                    break;
                }
            }
        }
        self.dispatcher.drain().await;
        Ok(())
    }

    async fn handle_message(&self, msg: &BorrowedMessage<'_>) {
        let Some(payload) = msg.payload() else {
            warn!(offset = msg.offset(), "Empty Kafka message payload");
            return;
        };
        let outcome = self.dispatcher.dispatch(payload).await;
        debug!(
            partition = msg.partition(),
            offset = msg.offset(),
            ?outcome,
            "Kafka message processed"
        );
    }
}
