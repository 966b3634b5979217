use chrono::{DateTime, Utc};
use common::{CorrelationId, MessageId};
use serde::{Deserialize, Serialize};

/// The wire contract shared by every integration event.
///
/// An envelope wraps one published fact with the identity and causal linkage
/// needed to trace a saga across services:
///
/// - `message_id` identifies this payload; consumers dedup on it.
/// - `correlation_id` identifies the saga instance and is propagated
///   unchanged by every downstream event.
/// - `causation_id` is the `message_id` of the event that triggered this
///   one, forming a tree rooted at the saga-initiating event (the only
///   event with `causation_id = None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identity of this published fact.
    pub message_id: MessageId,

    /// The saga instance this event belongs to.
    pub correlation_id: CorrelationId,

    /// The message that triggered this one; None for the initiating event.
    pub causation_id: Option<MessageId>,

    /// When the fact occurred.
    pub occurred_at: DateTime<Utc>,

    /// The event type name (e.g., "OrderPlaced", "PaymentCaptured").
    pub event_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Serializes the envelope for broker transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes an envelope received from the broker.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Returns true if this is a saga-initiating event.
    pub fn is_initiating(&self) -> bool {
        self.causation_id.is_none()
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    message_id: Option<MessageId>,
    correlation_id: Option<CorrelationId>,
    causation_id: Option<MessageId>,
    occurred_at: Option<DateTime<Utc>>,
    event_type: Option<String>,
    payload: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Sets the causation ID (the message that triggered this event).
    pub fn causation_id(mut self, id: MessageId) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Sets the occurrence timestamp. If not set, the current time is used.
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (correlation_id, event_type, payload)
    /// are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            message_id: self.message_id.unwrap_or_default(),
            correlation_id: self.correlation_id.expect("correlation_id is required"),
            causation_id: self.causation_id,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            event_type: self.event_type.expect("event_type is required"),
            payload: self.payload.expect("payload is required"),
        }
    }

    /// Tries to build the event envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            message_id: self.message_id.unwrap_or_default(),
            correlation_id: self.correlation_id?,
            causation_id: self.causation_id,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
            event_type: self.event_type?,
            payload: self.payload?,
        })
    }
}
