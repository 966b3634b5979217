//! Broker abstraction for publish-subscribe messaging between services.
//!
//! Delivery is at-least-once and no ordering is guaranteed across
//! producers; consumers rely on the inbox guard for dedup and on guarded
//! state transitions for out-of-order tolerance.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::error::{MessagingError, Result};

/// Prefix namespacing dead-letter traffic on the same broker.
pub const DLQ_PREFIX: &str = "dlq.";

/// Returns the dead-letter subject for a consumer subject.
pub fn dead_letter_subject(subject: &str) -> String {
    format!("{DLQ_PREFIX}{subject}")
}

/// A message received from the broker.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    /// The subject this message was published to.
    pub subject: String,
    /// The message payload (a serialized event envelope).
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Creates a new broker message.
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }
}

/// Publish-subscribe contract between services.
///
/// Subjects are event-type names; each service subscribes to the event
/// types it reacts to.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publishes a message to a subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribes to messages on one subject.
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BrokerMessage>>;
}

impl std::fmt::Debug for dyn MessageBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageBroker")
    }
}

/// Broker implementation over in-process broadcast channels.
///
/// Suitable for tests, local development, and single-process deployments.
/// Every subscriber sees every message on its subject; subscribers that lag
/// past the channel capacity lose the oldest messages (logged, and later
/// recovered by the outbox relay's redelivery).
#[derive(Clone)]
pub struct InMemoryBroker {
    sender: Arc<broadcast::Sender<BrokerMessage>>,
}

impl InMemoryBroker {
    /// Creates a broker with the default buffer of 1024 messages.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates a broker with a custom buffer size.
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self {
            sender: Arc::new(sender),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let message = BrokerMessage::new(subject, payload);

        // No receivers is fine: the relay may run before consumers attach.
        let _ = self.sender.send(message);
        metrics::counter!("broker_messages_published").increment(1);

        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BrokerMessage>> {
        if subject.is_empty() {
            return Err(MessagingError::Broker(
                "subject must not be empty".to_string(),
            ));
        }

        let mut receiver = self.sender.subscribe();
        let subject = subject.to_string();

        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if message.subject == subject {
                            yield message;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%subject, skipped, "broker subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(stream.boxed())
    }
}
