//! In-memory service store.
//!
//! Holds one service's aggregate state, outbox, and inbox behind a single
//! lock so every commit is atomic across all three, with the same interface
//! shape as the Postgres-backed store. Used by tests and single-process
//! deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::MessageId;
use tokio::sync::Mutex;

use crate::consumer::EventConsumer;
use crate::envelope::EventEnvelope;
use crate::error::{MessagingError, Result};
use crate::inbox::InboxRecord;
use crate::outbox::{OutboxRecord, OutboxSource};
use crate::store::{ProcessOutcome, TransactionScope};

struct StoreInner<S> {
    state: S,
    outbox: Vec<OutboxRecord>,
    inbox: HashMap<(MessageId, String), InboxRecord>,
    next_outbox_id: i64,
}

impl<S> StoreInner<S> {
    fn append_staged(&mut self, staged: Vec<EventEnvelope>) {
        for envelope in staged {
            let id = self.next_outbox_id;
            self.next_outbox_id += 1;
            metrics::counter!("outbox_enqueued").increment(1);
            self.outbox.push(OutboxRecord {
                id,
                envelope,
                created_at: Utc::now(),
                delivered_at: None,
            });
        }
    }
}

/// One service's local transactional store, in memory.
///
/// The lock is held for the duration of a transaction, including the
/// handler's awaits, mirroring an open database transaction: a handler's
/// state change, its staged outbox rows, and its inbox record commit
/// together or not at all. Rollback is copy-on-write: handlers mutate a
/// working copy which only replaces the committed state on success.
pub struct InMemoryStore<S> {
    inner: Arc<Mutex<StoreInner<S>>>,
}

impl<S> Clone for InMemoryStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Clone + Send + 'static> InMemoryStore<S> {
    /// Creates a store with the given initial state.
    pub fn new(state: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state,
                outbox: Vec::new(),
                inbox: HashMap::new(),
                next_outbox_id: 1,
            })),
        }
    }

    /// Runs a command in one local transaction.
    ///
    /// The closure edits the service state and stages outbox events; on
    /// `Ok` both commit atomically, on `Err` neither persists. This is the
    /// only way to persist a state change, so a mutation can never be
    /// separated from the events describing it.
    pub async fn transact<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut TransactionScope<S>) -> std::result::Result<T, E> + Send,
    {
        let mut inner = self.inner.lock().await;
        let mut scope = TransactionScope::new(inner.state.clone());

        let value = f(&mut scope)?;

        let (state, staged) = scope.into_parts();
        inner.state = state;
        inner.append_staged(staged);

        Ok(value)
    }

    /// Runs an inbox-guarded handler for one message, at most once.
    ///
    /// Within one local transaction: if `(message_id, consumer_name)` is
    /// already in the inbox the handler is not invoked and `Skipped` is
    /// returned. Otherwise the handler runs against a transaction scope
    /// and, on success, its state change, staged outbox rows, and the new
    /// inbox record commit together. On handler failure nothing persists
    /// and the error propagates for the consumer's redelivery schedule.
    pub async fn process_once<C>(
        &self,
        consumer: &C,
        envelope: &EventEnvelope,
    ) -> Result<ProcessOutcome>
    where
        C: EventConsumer<S> + ?Sized,
    {
        let mut inner = self.inner.lock().await;

        let key = (envelope.message_id, consumer.name().to_string());
        if inner.inbox.contains_key(&key) {
            tracing::debug!(
                consumer = consumer.name(),
                message_id = %envelope.message_id,
                "message already applied, skipping"
            );
            metrics::counter!("inbox_duplicates_skipped").increment(1);
            return Ok(ProcessOutcome::Skipped);
        }

        let mut scope = TransactionScope::new(inner.state.clone());

        match consumer.handle(envelope, &mut scope).await {
            Ok(()) => {
                let (state, staged) = scope.into_parts();
                inner.state = state;
                inner.append_staged(staged);
                inner.inbox.insert(
                    key,
                    InboxRecord::new(envelope.message_id, consumer.name(), envelope.correlation_id),
                );
                metrics::counter!("inbox_messages_applied").increment(1);
                Ok(ProcessOutcome::Applied)
            }
            // Working copy dropped: no state change, no outbox rows, no inbox record.
            Err(e) => Err(MessagingError::Handler(e)),
        }
    }

    /// Reads the committed state.
    pub async fn read<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        let inner = self.inner.lock().await;
        f(&inner.state)
    }

    /// Returns all outbox records, delivered and pending.
    pub async fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.inner.lock().await.outbox.clone()
    }

    /// Returns the number of pending outbox records.
    pub async fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .outbox
            .iter()
            .filter(|r| r.is_pending())
            .count()
    }

    /// Returns the number of inbox records.
    pub async fn inbox_len(&self) -> usize {
        self.inner.lock().await.inbox.len()
    }

    /// Returns true if the consumer has applied the given message.
    pub async fn inbox_contains(&self, message_id: MessageId, consumer_name: &str) -> bool {
        self.inner
            .lock()
            .await
            .inbox
            .contains_key(&(message_id, consumer_name.to_string()))
    }
}

#[async_trait]
impl<S: Clone + Send + 'static> OutboxSource for InMemoryStore<S> {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .outbox
            .iter()
            .filter(|r| r.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, ids: &[i64]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for record in inner.outbox.iter_mut() {
            if record.is_pending() && ids.contains(&record.id) {
                record.delivered_at = Some(now);
            }
        }
        Ok(())
    }
}
