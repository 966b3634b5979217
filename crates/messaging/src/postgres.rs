//! Postgres-backed outbox and inbox.
//!
//! Production deployments colocate these tables with the service's
//! aggregate tables so an enqueue or inbox insert shares ACID scope with
//! the business mutation: callers pass their open `sqlx::Transaction` and
//! commit everything together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, MessageId};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{Row, Transaction};
use uuid::Uuid;

use crate::envelope::EventEnvelope;
use crate::error::Result;
use crate::outbox::{OutboxRecord, OutboxSource};

/// Applies the messaging schema (outbox + inbox tables).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(include_str!(
        "../../../migrations/001_create_messaging_tables.sql"
    ))
    .execute(pool)
    .await?;
    Ok(())
}

/// One service's slice of the shared outbox table.
#[derive(Debug, Clone)]
pub struct PostgresOutbox {
    pool: PgPool,
    service: String,
}

impl PostgresOutbox {
    /// Creates an outbox handle for one producing service.
    pub fn new(pool: PgPool, service: impl Into<String>) -> Self {
        Self {
            pool,
            service: service.into(),
        }
    }

    /// Appends a pending record inside the caller's open transaction.
    ///
    /// This is the write half of save-changes-and-enqueue: the caller
    /// persists its aggregate mutation and enqueues the events it produced
    /// on the same transaction, then commits once.
    pub async fn enqueue(
        tx: &mut Transaction<'_, Postgres>,
        service: &str,
        envelope: &EventEnvelope,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox (
                service,
                message_id,
                correlation_id,
                causation_id,
                event_type,
                occurred_at,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(service)
        .bind(envelope.message_id.as_uuid())
        .bind(envelope.correlation_id.as_uuid())
        .bind(envelope.causation_id.map(|id| id.as_uuid()))
        .bind(&envelope.event_type)
        .bind(envelope.occurred_at)
        .bind(&envelope.payload)
        .execute(&mut **tx)
        .await?;

        metrics::counter!("outbox_enqueued").increment(1);
        tracing::debug!(
            message_id = %envelope.message_id,
            event_type = %envelope.event_type,
            "event enqueued to outbox"
        );

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    message_id: Uuid,
    correlation_id: Uuid,
    causation_id: Option<Uuid>,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: row.id,
            envelope: EventEnvelope {
                message_id: MessageId::from_uuid(row.message_id),
                correlation_id: CorrelationId::from_uuid(row.correlation_id),
                causation_id: row.causation_id.map(MessageId::from_uuid),
                occurred_at: row.occurred_at,
                event_type: row.event_type,
                payload: row.payload,
            },
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        }
    }
}

#[async_trait]
impl OutboxSource for PostgresOutbox {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, message_id, correlation_id, causation_id,
                   event_type, occurred_at, payload, created_at, delivered_at
            FROM outbox
            WHERE service = $1 AND delivered_at IS NULL
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(&self.service)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn mark_delivered(&self, ids: &[i64]) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET delivered_at = NOW()
            WHERE service = $1 AND id = ANY($2)
            "#,
        )
        .bind(&self.service)
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// One consuming service's inbox: the `(message_id, consumer)` dedup ledger.
#[derive(Debug, Clone)]
pub struct PostgresInbox {
    pool: PgPool,
}

impl PostgresInbox {
    /// Creates an inbox handle over the shared pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records the message as applied inside the caller's open transaction.
    ///
    /// Returns false if the `(message_id, consumer)` pair already exists,
    /// in which case the caller must roll back its transaction and skip the
    /// message.
    pub async fn try_record(
        tx: &mut Transaction<'_, Postgres>,
        consumer_name: &str,
        envelope: &EventEnvelope,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbox (message_id, consumer_name, correlation_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, consumer_name) DO NOTHING
            "#,
        )
        .bind(envelope.message_id.as_uuid())
        .bind(consumer_name)
        .bind(envelope.correlation_id.as_uuid())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns true if the consumer has already applied the message.
    pub async fn contains(&self, message_id: MessageId, consumer_name: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM inbox
                WHERE message_id = $1 AND consumer_name = $2
            ) AS present
            "#,
        )
        .bind(message_id.as_uuid())
        .bind(consumer_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<bool, _>("present"))
    }

    /// Returns the number of messages this consumer has applied.
    pub async fn processed_count(&self, consumer_name: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM inbox WHERE consumer_name = $1
            "#,
        )
        .bind(consumer_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("count"))
    }
}
