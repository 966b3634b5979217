//! Consumer runtime: bounded worker pools that drive inbox-guarded
//! handlers from broker subscriptions.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

use crate::broker::{BrokerMessage, MessageBroker, dead_letter_subject};
use crate::envelope::EventEnvelope;
use crate::error::{HandlerError, Result};
use crate::memory::InMemoryStore;
use crate::retry::RetryPolicy;
use crate::store::TransactionScope;

/// A business handler bound to the event types one service subscribes to.
///
/// Implementations mutate their service's state through the transaction
/// scope and stage follow-up events on it; the store commits the whole unit
/// together with the inbox record, or nothing. Guarded-transition
/// rejections for duplicate or out-of-order deliveries must be swallowed
/// (return `Ok`), not surfaced as errors.
#[async_trait]
pub trait EventConsumer<S: Send>: Send + Sync {
    /// Stable name identifying this consumer in inbox records.
    fn name(&self) -> &'static str;

    /// Applies one event inside the given transaction scope.
    async fn handle(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<S>,
    ) -> std::result::Result<(), HandlerError>;
}

/// Configuration for a consumer pool.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum messages processed concurrently across the pool's
    /// subscriptions.
    pub max_in_flight: usize,
    /// Redelivery schedule for a handler that failed transiently; once
    /// exhausted the message is dead-lettered.
    pub redelivery: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            redelivery: RetryPolicy {
                max_attempts: 5,
                initial_backoff: std::time::Duration::from_millis(50),
                max_backoff: std::time::Duration::from_secs(5),
                jitter: 0.2,
            },
        }
    }
}

/// A pool of consumer workers for one service.
///
/// Each subscription runs a listener task; message handling is fanned out
/// to worker tasks bounded by a shared semaphore. Shutting down the pool
/// stops the listeners; a message mid-handler simply never commits and is
/// redelivered by the relay/broker on restart.
pub struct ConsumerPool {
    broker: Arc<dyn MessageBroker>,
    semaphore: Arc<Semaphore>,
    config: ConsumerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    listeners: Vec<JoinHandle<()>>,
}

impl ConsumerPool {
    /// Creates an empty pool over the given broker.
    pub fn new(broker: Arc<dyn MessageBroker>, config: ConsumerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            broker,
            semaphore: Arc::new(Semaphore::new(config.max_in_flight)),
            config,
            shutdown_tx,
            shutdown_rx,
            listeners: Vec::new(),
        }
    }

    /// Subscribes a consumer to one subject, spawning its listener task.
    ///
    /// Call once per (consumer, event type) pair the service reacts to.
    pub async fn subscribe<S, C>(
        &mut self,
        subject: &str,
        store: InMemoryStore<S>,
        consumer: Arc<C>,
    ) -> Result<()>
    where
        S: Clone + Send + 'static,
        C: EventConsumer<S> + 'static,
    {
        let mut stream = self.broker.subscribe(subject).await?;
        let semaphore = Arc::clone(&self.semaphore);
        let broker = Arc::clone(&self.broker);
        let policy = self.config.redelivery.clone();
        let mut shutdown = self.shutdown_rx.clone();
        let subject = subject.to_string();

        tracing::info!(consumer = consumer.name(), %subject, "consumer subscribed");

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = stream.next() => {
                        let Some(message) = maybe else { break };
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            break;
                        };

                        let store = store.clone();
                        let consumer = Arc::clone(&consumer);
                        let broker = Arc::clone(&broker);
                        let policy = policy.clone();
                        let subject = subject.clone();

                        tokio::spawn(async move {
                            deliver(message, &store, consumer.as_ref(), &broker, &policy, &subject)
                                .await;
                            drop(permit);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });

        self.listeners.push(handle);
        Ok(())
    }

    /// Stops all listener tasks and waits for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.listeners {
            let _ = handle.await;
        }
    }
}

/// Runs one delivery through the inbox guard with the redelivery schedule,
/// dead-lettering the message once the budget is exhausted.
async fn deliver<S, C>(
    message: BrokerMessage,
    store: &InMemoryStore<S>,
    consumer: &C,
    broker: &Arc<dyn MessageBroker>,
    policy: &RetryPolicy,
    subject: &str,
) where
    S: Clone + Send + 'static,
    C: EventConsumer<S> + ?Sized,
{
    let envelope = match EventEnvelope::from_bytes(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(%subject, error = %e, "undecodable message, dead-lettering");
            dead_letter(broker, subject, message.payload).await;
            return;
        }
    };

    let mut attempt = 0;
    let failure = loop {
        attempt += 1;

        match store.process_once(consumer, &envelope).await {
            Ok(outcome) => {
                tracing::debug!(
                    consumer = consumer.name(),
                    message_id = %envelope.message_id,
                    ?outcome,
                    "message processed"
                );
                return;
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let backoff = policy.backoff_for_attempt(attempt);
                tracing::warn!(
                    consumer = consumer.name(),
                    message_id = %envelope.message_id,
                    attempt,
                    backoff_ms = backoff.as_millis(),
                    error = %e,
                    "handler failed, scheduling redelivery"
                );
                metrics::counter!("consumer_redeliveries").increment(1);
                tokio::time::sleep(backoff).await;
            }
            Err(e) => break e,
        }
    };

    tracing::error!(
        consumer = consumer.name(),
        message_id = %envelope.message_id,
        attempts = attempt,
        error = %failure,
        "redelivery budget exhausted, dead-lettering"
    );
    dead_letter(broker, subject, message.payload).await;
}

async fn dead_letter(broker: &Arc<dyn MessageBroker>, subject: &str, payload: Vec<u8>) {
    let dlq = dead_letter_subject(subject);
    if let Err(e) = broker.publish(&dlq, payload).await {
        tracing::error!(%dlq, error = %e, "failed to publish to dead-letter subject");
    }
    metrics::counter!("consumer_dead_lettered").increment(1);
}
