//! Outbox relay: the background task that moves committed outbox records
//! onto the broker.
//!
//! Delivery is at-least-once: a crash between broker-accept and
//! mark-delivered causes the record to be re-sent on the next cycle, which
//! consumers absorb through their inbox guards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::MessageId;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::broker::MessageBroker;
use crate::error::Result;
use crate::outbox::OutboxSource;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often to poll for pending records.
    pub poll_interval: Duration,
    /// Maximum records drained per cycle.
    pub batch_size: usize,
    /// Records published within this window are not re-sent while their
    /// delivered-mark is still outstanding. A latency optimization only:
    /// correctness rests on consumer-side dedup.
    pub dedup_window: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            dedup_window: Duration::from_secs(30),
        }
    }
}

/// Drains one service's outbox to the broker.
///
/// One relay runs per service process as a supervised long-running task
/// with an explicit lifecycle: [`OutboxRelay::spawn`] starts it,
/// [`RelayHandle::stop`] shuts it down.
pub struct OutboxRelay<O: OutboxSource> {
    service: String,
    outbox: O,
    broker: Arc<dyn MessageBroker>,
    config: RelayConfig,
    recently_sent: Mutex<HashMap<MessageId, Instant>>,
}

impl<O: OutboxSource + 'static> OutboxRelay<O> {
    /// Creates a relay for one service's outbox.
    pub fn new(
        service: impl Into<String>,
        outbox: O,
        broker: Arc<dyn MessageBroker>,
        config: RelayConfig,
    ) -> Self {
        Self {
            service: service.into(),
            outbox,
            broker,
            config,
            recently_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Drains one batch of pending records, oldest first.
    ///
    /// Records are attempted in enqueue order; a publish failure stops the
    /// batch so order is preserved on the next cycle. Returns the number of
    /// records marked delivered.
    pub async fn drain_once(&self) -> Result<usize> {
        let pending = self.outbox.fetch_pending(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        tracing::debug!(
            service = %self.service,
            count = pending.len(),
            "draining pending outbox records"
        );

        {
            let mut sent = self.recently_sent.lock().await;
            let window = self.config.dedup_window;
            sent.retain(|_, at| at.elapsed() < window);
        }

        let mut delivered = Vec::with_capacity(pending.len());

        for record in &pending {
            let already_sent = {
                let sent = self.recently_sent.lock().await;
                sent.get(&record.envelope.message_id)
                    .is_some_and(|at| at.elapsed() < self.config.dedup_window)
            };

            if !already_sent {
                let bytes = record.envelope.to_bytes()?;
                if let Err(e) = self
                    .broker
                    .publish(&record.envelope.event_type, bytes)
                    .await
                {
                    tracing::error!(
                        service = %self.service,
                        message_id = %record.envelope.message_id,
                        error = %e,
                        "failed to publish outbox record, stopping batch"
                    );
                    metrics::counter!("outbox_publish_failures").increment(1);
                    break;
                }

                self.recently_sent
                    .lock()
                    .await
                    .insert(record.envelope.message_id, Instant::now());
                metrics::counter!("outbox_published").increment(1);

                tracing::debug!(
                    service = %self.service,
                    message_id = %record.envelope.message_id,
                    event_type = %record.envelope.event_type,
                    "outbox record published"
                );
            }

            delivered.push(record.id);
        }

        if !delivered.is_empty() {
            self.outbox.mark_delivered(&delivered).await?;
        }

        Ok(delivered.len())
    }

    /// Starts the relay's polling loop.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(service = %self.service, "outbox relay started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.drain_once().await {
                            tracing::error!(
                                service = %self.service,
                                error = %e,
                                "outbox drain cycle failed"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            tracing::info!(service = %self.service, "outbox relay stopped");
        });

        RelayHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to a running relay task.
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RelayHandle {
    /// Signals the relay to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
