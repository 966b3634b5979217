//! Outbox records: events written durably alongside the state change that
//! produced them, pending delivery to the broker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::envelope::EventEnvelope;

/// A durable record of one to-be-delivered event.
///
/// Owned exclusively by the producing service: created inside the same local
/// transaction as the aggregate mutation that produced the event, and marked
/// delivered only by that service's relay.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    /// Monotonic per-producer sequence number.
    pub id: i64,

    /// The event to deliver.
    pub envelope: EventEnvelope,

    /// When the record was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the broker accepted the event; None while pending.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Returns true if the record has not been delivered yet.
    pub fn is_pending(&self) -> bool {
        self.delivered_at.is_none()
    }
}

/// Source of pending outbox records for a relay.
///
/// Implemented by the in-memory service store and by the Postgres outbox.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Fetches up to `limit` pending records, oldest first.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// Marks the given records as delivered.
    async fn mark_delivered(&self, ids: &[i64]) -> Result<()>;
}
