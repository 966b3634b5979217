//! Inbox records: the per-(consumer, message) dedup ledger that turns
//! at-least-once delivery into exactly-once effect.

use chrono::{DateTime, Utc};
use common::{CorrelationId, MessageId};

/// Proof that one consumer has applied one message.
///
/// The `(message_id, consumer_name)` pair is unique: a row's existence means
/// "this consumer already applied this exact message; skip". The record is
/// written in the same local transaction as the handler's state change.
#[derive(Debug, Clone)]
pub struct InboxRecord {
    /// The message that was applied.
    pub message_id: MessageId,

    /// The consumer that applied it.
    pub consumer_name: String,

    /// Saga instance the message belonged to, kept for tracing.
    pub correlation_id: CorrelationId,

    /// When the message was applied.
    pub processed_at: DateTime<Utc>,
}

impl InboxRecord {
    /// Creates a record stamped with the current time.
    pub fn new(
        message_id: MessageId,
        consumer_name: impl Into<String>,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            message_id,
            consumer_name: consumer_name.into(),
            correlation_id,
            processed_at: Utc::now(),
        }
    }

    /// Returns the composite dedup key.
    pub fn key(&self) -> (MessageId, &str) {
        (self.message_id, self.consumer_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_message_and_consumer() {
        let message_id = MessageId::new();
        let record = InboxRecord::new(message_id, "order-service", CorrelationId::new());

        assert_eq!(record.key(), (message_id, "order-service"));
    }
}
