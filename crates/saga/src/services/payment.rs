//! Payment service: reacts to successful reservations by driving the
//! gateway through authorize and capture.
//!
//! Gateway calls run inside the handler's transaction: if the process dies
//! before commit, nothing is persisted and the redelivered event re-runs
//! the handler from scratch. Declines are business outcomes that enqueue
//! `PaymentFailed`; only transport faults are surfaced for redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{IntegrationEvent, Payment, PaymentMethod};
use messaging::{EventConsumer, EventEnvelope, HandlerError, InMemoryStore, TransactionScope};

use crate::error::{Result, SagaError};
use crate::gateways::{GatewayResponse, PaymentGateway};
use crate::policy::GatewayPolicy;

/// Local state owned by the payment service.
#[derive(Debug, Clone, Default)]
pub struct PaymentServiceState {
    payments: HashMap<AggregateId, Payment>,
    by_order: HashMap<AggregateId, AggregateId>,
}

/// The payment service.
pub struct PaymentService {
    store: InMemoryStore<PaymentServiceState>,
    gateway: Arc<dyn PaymentGateway>,
    policy: GatewayPolicy,
    currency: String,
}

impl PaymentService {
    /// Event types this service reacts to.
    pub const SUBSCRIPTIONS: &'static [&'static str] = &["InventoryReserved"];

    /// Creates the service over the given gateway.
    pub fn new(gateway: Arc<dyn PaymentGateway>, policy: GatewayPolicy) -> Self {
        Self {
            store: InMemoryStore::new(PaymentServiceState::default()),
            gateway,
            policy,
            currency: "USD".to_string(),
        }
    }

    /// Returns the service's local store.
    pub fn store(&self) -> &InMemoryStore<PaymentServiceState> {
        &self.store
    }

    /// Returns a copy of the payment, if it exists.
    pub async fn get_payment(&self, payment_id: AggregateId) -> Option<Payment> {
        self.store
            .read(|s| s.payments.get(&payment_id).cloned())
            .await
    }

    /// Returns the payment for an order, if one was created.
    pub async fn get_payment_for_order(&self, order_id: AggregateId) -> Option<Payment> {
        self.store
            .read(|s| {
                s.by_order
                    .get(&order_id)
                    .and_then(|payment_id| s.payments.get(payment_id))
                    .cloned()
            })
            .await
    }

    /// Cancels a payment that has not been captured.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_payment(
        &self,
        payment_id: AggregateId,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<()> {
        let reason = reason.into();
        self.store
            .transact(move |tx| {
                let payment = tx
                    .state_mut()
                    .payments
                    .get_mut(&payment_id)
                    .ok_or(SagaError::PaymentNotFound(payment_id))?;
                payment.cancel(reason)?;
                Ok::<_, SagaError>(())
            })
            .await?;

        metrics::counter!("payments_cancelled").increment(1);
        Ok(())
    }

    /// Refunds a captured payment through the gateway.
    #[tracing::instrument(skip(self))]
    pub async fn refund_payment(&self, payment_id: AggregateId) -> Result<()> {
        let (order_id, amount) = self
            .store
            .read(|s| {
                s.payments
                    .get(&payment_id)
                    .map(|p| (p.order_id(), p.amount()))
            })
            .await
            .ok_or(SagaError::PaymentNotFound(payment_id))?;

        let response = self
            .policy
            .execute("payment.refund", || self.gateway.refund(order_id, amount))
            .await?;

        let code = match response {
            GatewayResponse::Approved { confirmation_code } => confirmation_code,
            GatewayResponse::Declined { reason } => {
                return Err(SagaError::Gateway(format!("refund declined: {reason}")));
            }
        };

        self.store
            .transact(move |tx| {
                let payment = tx
                    .state_mut()
                    .payments
                    .get_mut(&payment_id)
                    .ok_or(SagaError::PaymentNotFound(payment_id))?;
                payment.refund(code)?;
                Ok::<_, SagaError>(())
            })
            .await?;

        metrics::counter!("payments_refunded").increment(1);
        Ok(())
    }

    async fn call_gateway<F, Fut>(
        &self,
        context: &str,
        operation: F,
    ) -> std::result::Result<GatewayResponse, HandlerError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<GatewayResponse>>,
    {
        // Transport faults and open-circuit rejections are transient: the
        // broker redelivers and the handler re-runs from scratch.
        self.policy
            .execute(context, operation)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))
    }
}

#[async_trait]
impl EventConsumer<PaymentServiceState> for PaymentService {
    fn name(&self) -> &'static str {
        "payment-service"
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<PaymentServiceState>,
    ) -> std::result::Result<(), HandlerError> {
        let event = IntegrationEvent::from_envelope(envelope)
            .map_err(|e| HandlerError::Fatal(format!("undecodable payload: {e}")))?;

        let data = match event {
            IntegrationEvent::InventoryReserved(data) => data,
            other => {
                tracing::warn!(
                    event_type = other.event_type(),
                    "unexpected event type for payment service"
                );
                return Ok(());
            }
        };

        // One payment per order: a second InventoryReserved for the same
        // order (distinct message id) must not charge twice.
        if tx.state().by_order.contains_key(&data.order_id) {
            tracing::debug!(order_id = %data.order_id, "payment already exists, skipping");
            return Ok(());
        }

        let amount = data.total_amount;
        let order_id = data.order_id;

        let authorization = self
            .call_gateway("payment.authorize", || {
                self.gateway.authorize(order_id, amount)
            })
            .await?;

        let mut payment =
            Payment::initiate(order_id, amount, &self.currency, PaymentMethod::Card)
                .map_err(|e| HandlerError::Fatal(e.to_string()))?;
        let payment_id = payment.id();

        let auth_code = match authorization {
            GatewayResponse::Declined { reason } => {
                payment
                    .fail("authorize", &reason)
                    .map_err(|e| HandlerError::Fatal(e.to_string()))?;
                finish(tx, envelope, payment, Some(failed_event(order_id, payment_id, &reason)))?;
                metrics::counter!("payments_failed").increment(1);
                tracing::info!(%order_id, %reason, "authorization declined");
                return Ok(());
            }
            GatewayResponse::Approved { confirmation_code } => confirmation_code,
        };

        payment
            .authorize(&auth_code)
            .map_err(|e| HandlerError::Fatal(e.to_string()))?;
        let authorized =
            IntegrationEvent::payment_authorized(order_id, payment_id, amount, &auth_code);

        let capture = self
            .call_gateway("payment.capture", || self.gateway.capture(order_id, amount))
            .await?;

        match capture {
            GatewayResponse::Declined { reason } => {
                payment
                    .fail("capture", &reason)
                    .map_err(|e| HandlerError::Fatal(e.to_string()))?;
                enqueue(tx, envelope, authorized)?;
                finish(tx, envelope, payment, Some(failed_event(order_id, payment_id, &reason)))?;
                metrics::counter!("payments_failed").increment(1);
                tracing::info!(%order_id, %reason, "capture declined");
            }
            GatewayResponse::Approved { confirmation_code } => {
                payment
                    .capture(&confirmation_code)
                    .map_err(|e| HandlerError::Fatal(e.to_string()))?;
                let captured = IntegrationEvent::payment_captured(
                    order_id,
                    payment_id,
                    amount,
                    &confirmation_code,
                );
                enqueue(tx, envelope, authorized)?;
                finish(tx, envelope, payment, Some(captured))?;
                metrics::counter!("payments_captured").increment(1);
                tracing::info!(%order_id, %payment_id, amount = %amount, "payment captured");
            }
        }

        Ok(())
    }
}

fn failed_event(
    order_id: AggregateId,
    payment_id: AggregateId,
    reason: &str,
) -> IntegrationEvent {
    IntegrationEvent::payment_failed(order_id, Some(payment_id), reason)
}

fn enqueue(
    tx: &mut TransactionScope<PaymentServiceState>,
    trigger: &EventEnvelope,
    event: IntegrationEvent,
) -> std::result::Result<(), HandlerError> {
    tx.enqueue(
        event
            .into_envelope(trigger.correlation_id, Some(trigger.message_id))
            .map_err(|e| HandlerError::Fatal(e.to_string()))?,
    );
    Ok(())
}

/// Persists the payment and optionally enqueues a final event.
fn finish(
    tx: &mut TransactionScope<PaymentServiceState>,
    trigger: &EventEnvelope,
    payment: Payment,
    event: Option<IntegrationEvent>,
) -> std::result::Result<(), HandlerError> {
    if let Some(event) = event {
        enqueue(tx, trigger, event)?;
    }
    let state = tx.state_mut();
    state.by_order.insert(payment.order_id(), payment.id());
    state.payments.insert(payment.id(), payment);
    Ok(())
}
