//! Delivery service: creates shipments once payment is captured and books
//! them with the carrier.
//!
//! Creating a shipment reads order details synchronously from the order
//! service (a read-only exception to choreography). Dispatch and delivery
//! marking are external commands, idempotent at-or-past their target
//! status, each enqueueing the matching event for the order service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, MessageId};
use domain::{IntegrationEvent, Shipment, ShipmentStatus};
use messaging::{EventConsumer, EventEnvelope, HandlerError, InMemoryStore, TransactionScope};

use crate::error::{Result, SagaError};
use crate::gateways::{BookingResponse, CarrierClient, OrderDetailsClient};
use crate::policy::GatewayPolicy;

/// Local state owned by the delivery service.
#[derive(Debug, Clone, Default)]
pub struct DeliveryServiceState {
    shipments: HashMap<AggregateId, Shipment>,
    by_order: HashMap<AggregateId, AggregateId>,
    /// Message id of the latest event enqueued per shipment, so that
    /// command-triggered events keep an unbroken causal chain.
    causal_anchor: HashMap<AggregateId, MessageId>,
}

/// The delivery service.
pub struct DeliveryService {
    store: InMemoryStore<DeliveryServiceState>,
    orders: Arc<dyn OrderDetailsClient>,
    carrier: Arc<dyn CarrierClient>,
    policy: GatewayPolicy,
}

impl DeliveryService {
    /// Event types this service reacts to. It consumes its own
    /// `ShipmentCreated` to drive the carrier booking asynchronously.
    pub const SUBSCRIPTIONS: &'static [&'static str] = &["PaymentCaptured", "ShipmentCreated"];

    /// Creates the service over the given collaborators.
    pub fn new(
        orders: Arc<dyn OrderDetailsClient>,
        carrier: Arc<dyn CarrierClient>,
        policy: GatewayPolicy,
    ) -> Self {
        Self {
            store: InMemoryStore::new(DeliveryServiceState::default()),
            orders,
            carrier,
            policy,
        }
    }

    /// Returns the service's local store.
    pub fn store(&self) -> &InMemoryStore<DeliveryServiceState> {
        &self.store
    }

    /// Returns a copy of the shipment, if it exists.
    pub async fn get_shipment(&self, shipment_id: AggregateId) -> Option<Shipment> {
        self.store
            .read(|s| s.shipments.get(&shipment_id).cloned())
            .await
    }

    /// Returns the shipment for an order, if one was created.
    pub async fn get_shipment_for_order(&self, order_id: AggregateId) -> Option<Shipment> {
        self.store
            .read(|s| {
                s.by_order
                    .get(&order_id)
                    .and_then(|shipment_id| s.shipments.get(shipment_id))
                    .cloned()
            })
            .await
    }

    /// Marks a shipment as dispatched (operational command).
    ///
    /// A no-op if the shipment is already at or past Dispatched.
    #[tracing::instrument(skip(self))]
    pub async fn mark_dispatched(&self, shipment_id: AggregateId) -> Result<()> {
        let dispatched = self
            .store
            .transact(move |tx| {
                let state = tx.state();
                let shipment = state
                    .shipments
                    .get(&shipment_id)
                    .ok_or(SagaError::ShipmentNotFound(shipment_id))?;

                if shipment.status().is_at_or_past(ShipmentStatus::Dispatched) {
                    return Ok::<_, SagaError>(false);
                }

                let order_id = shipment.order_id();
                let anchor = state.causal_anchor.get(&shipment_id).copied();

                let envelope = IntegrationEvent::shipment_dispatched(order_id, shipment_id)
                    .into_envelope(order_id.into(), anchor)?;
                let message_id = envelope.message_id;

                let state = tx.state_mut();
                state
                    .shipments
                    .get_mut(&shipment_id)
                    .ok_or(SagaError::ShipmentNotFound(shipment_id))?
                    .dispatch()?;
                state.causal_anchor.insert(shipment_id, message_id);
                tx.enqueue(envelope);

                Ok(true)
            })
            .await?;

        if dispatched {
            metrics::counter!("shipments_dispatched").increment(1);
            tracing::info!(%shipment_id, "shipment dispatched");
        }
        Ok(())
    }

    /// Marks a shipment as delivered (operational command).
    ///
    /// A no-op if the shipment is already delivered.
    #[tracing::instrument(skip(self))]
    pub async fn mark_delivered(&self, shipment_id: AggregateId) -> Result<()> {
        let delivered = self
            .store
            .transact(move |tx| {
                let state = tx.state();
                let shipment = state
                    .shipments
                    .get(&shipment_id)
                    .ok_or(SagaError::ShipmentNotFound(shipment_id))?;

                if shipment.status() == ShipmentStatus::Delivered {
                    return Ok::<_, SagaError>(false);
                }

                let order_id = shipment.order_id();
                let anchor = state.causal_anchor.get(&shipment_id).copied();

                let envelope = IntegrationEvent::shipment_delivered(order_id, shipment_id)
                    .into_envelope(order_id.into(), anchor)?;
                let message_id = envelope.message_id;

                let state = tx.state_mut();
                state
                    .shipments
                    .get_mut(&shipment_id)
                    .ok_or(SagaError::ShipmentNotFound(shipment_id))?
                    .deliver()?;
                state.causal_anchor.insert(shipment_id, message_id);
                tx.enqueue(envelope);

                Ok(true)
            })
            .await?;

        if delivered {
            metrics::counter!("shipments_delivered").increment(1);
            tracing::info!(%shipment_id, "shipment delivered");
        }
        Ok(())
    }

    async fn on_payment_captured(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<DeliveryServiceState>,
        order_id: AggregateId,
    ) -> std::result::Result<(), HandlerError> {
        // One shipment per order, regardless of how the trigger arrives.
        if tx.state().by_order.contains_key(&order_id) {
            tracing::debug!(%order_id, "shipment already exists, skipping");
            return Ok(());
        }

        let details = self
            .orders
            .fetch(order_id)
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?
            .ok_or_else(|| HandlerError::Fatal(format!("order {order_id} not found")))?;

        let shipment = Shipment::create(order_id, details.shipping_address, details.items)
            .map_err(|e| HandlerError::Fatal(e.to_string()))?;
        let shipment_id = shipment.id();

        let created = IntegrationEvent::shipment_created(order_id, shipment_id)
            .into_envelope(envelope.correlation_id, Some(envelope.message_id))
            .map_err(|e| HandlerError::Fatal(e.to_string()))?;
        let message_id = created.message_id;

        let state = tx.state_mut();
        state.by_order.insert(order_id, shipment_id);
        state.shipments.insert(shipment_id, shipment);
        state.causal_anchor.insert(shipment_id, message_id);
        tx.enqueue(created);

        metrics::counter!("shipments_created").increment(1);
        tracing::info!(%order_id, %shipment_id, "shipment created");
        Ok(())
    }

    async fn on_shipment_created(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<DeliveryServiceState>,
        order_id: AggregateId,
        shipment_id: AggregateId,
    ) -> std::result::Result<(), HandlerError> {
        let Some(address) = tx.state().shipments.get(&shipment_id).and_then(|shipment| {
            shipment
                .status()
                .can_book()
                .then(|| shipment.address().clone())
        }) else {
            tracing::debug!(%shipment_id, "shipment missing or already booked, skipping");
            return Ok(());
        };

        let booking = self
            .policy
            .execute("carrier.book_label", || {
                self.carrier.book_label(shipment_id, &address)
            })
            .await
            .map_err(|e| HandlerError::Transient(e.to_string()))?;

        let state = tx.state_mut();
        let shipment = state
            .shipments
            .get_mut(&shipment_id)
            .ok_or_else(|| HandlerError::Fatal(format!("unknown shipment {shipment_id}")))?;

        let event = match booking {
            BookingResponse::Booked {
                carrier,
                tracking_number,
            } => {
                shipment
                    .book_label(&carrier, &tracking_number)
                    .map_err(|e| HandlerError::Fatal(e.to_string()))?;
                metrics::counter!("shipments_booked").increment(1);
                tracing::info!(%shipment_id, %carrier, %tracking_number, "label booked");
                IntegrationEvent::shipment_booked(order_id, shipment_id, carrier, tracking_number)
            }
            BookingResponse::Refused { reason } => {
                shipment
                    .fail_booking(&reason)
                    .map_err(|e| HandlerError::Fatal(e.to_string()))?;
                metrics::counter!("shipment_bookings_failed").increment(1);
                tracing::warn!(%shipment_id, %reason, "booking refused");
                IntegrationEvent::shipment_booking_failed(order_id, shipment_id, reason)
            }
        };

        let booked = event
            .into_envelope(envelope.correlation_id, Some(envelope.message_id))
            .map_err(|e| HandlerError::Fatal(e.to_string()))?;
        state.causal_anchor.insert(shipment_id, booked.message_id);
        tx.enqueue(booked);

        Ok(())
    }
}

#[async_trait]
impl EventConsumer<DeliveryServiceState> for DeliveryService {
    fn name(&self) -> &'static str {
        "delivery-service"
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<DeliveryServiceState>,
    ) -> std::result::Result<(), HandlerError> {
        let event = IntegrationEvent::from_envelope(envelope)
            .map_err(|e| HandlerError::Fatal(format!("undecodable payload: {e}")))?;

        match event {
            IntegrationEvent::PaymentCaptured(data) => {
                self.on_payment_captured(envelope, tx, data.order_id).await
            }
            IntegrationEvent::ShipmentCreated(data) => {
                self.on_shipment_created(envelope, tx, data.order_id, data.shipment_id)
                    .await
            }
            other => {
                tracing::warn!(
                    event_type = other.event_type(),
                    "unexpected event type for delivery service"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::{InMemoryCarrierClient, InMemoryOrderDetailsClient, OrderDetails};
    use domain::{Address, Money, OrderItem};
    use messaging::{CircuitBreakerConfig, CorrelationId, RetryPolicy};
    use std::time::Duration;

    fn fast_policy() -> GatewayPolicy {
        GatewayPolicy::new(
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                jitter: 0.0,
            },
            CircuitBreakerConfig {
                failure_threshold: 50,
                cooldown: Duration::from_secs(30),
                success_threshold: 1,
            },
        )
    }

    fn setup() -> (DeliveryService, InMemoryOrderDetailsClient, InMemoryCarrierClient) {
        let orders = InMemoryOrderDetailsClient::new();
        let carrier = InMemoryCarrierClient::new();
        let service = DeliveryService::new(
            Arc::new(orders.clone()),
            Arc::new(carrier.clone()),
            fast_policy(),
        );
        (service, orders, carrier)
    }

    fn register_order(orders: &InMemoryOrderDetailsClient) -> AggregateId {
        let order_id = AggregateId::new();
        orders.insert(OrderDetails {
            order_id,
            shipping_address: Address::new("1 Main St", "Springfield", "12345", "US"),
            items: vec![OrderItem::new("SKU-001", 2, Money::from_cents(1000))],
        });
        order_id
    }

    fn captured_envelope(order_id: AggregateId) -> EventEnvelope {
        IntegrationEvent::payment_captured(
            order_id,
            AggregateId::new(),
            Money::from_cents(2000),
            "CAP-0001",
        )
        .into_envelope(CorrelationId::from(order_id), Some(MessageId::new()))
        .unwrap()
    }

    /// Runs PaymentCaptured through the service and returns the shipment id.
    async fn create_shipment(service: &DeliveryService, order_id: AggregateId) -> AggregateId {
        service
            .store()
            .process_once(service, &captured_envelope(order_id))
            .await
            .unwrap();
        service
            .get_shipment_for_order(order_id)
            .await
            .expect("shipment created")
            .id()
    }

    /// Feeds the pending ShipmentCreated outbox row back into the service,
    /// as the relay and broker would.
    async fn pump_booking(service: &DeliveryService) {
        let records = service.store().outbox_records().await;
        let created = records
            .iter()
            .find(|r| r.envelope.event_type == "ShipmentCreated")
            .expect("ShipmentCreated enqueued")
            .clone();
        service
            .store()
            .process_once(service, &created.envelope)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_payment_captured_creates_shipment() {
        let (service, orders, _) = setup();
        let order_id = register_order(&orders);

        let shipment_id = create_shipment(&service, order_id).await;

        let shipment = service.get_shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::Created);
        assert_eq!(shipment.order_id(), order_id);
        assert_eq!(shipment.items().len(), 1);

        let records = service.store().outbox_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].envelope.event_type, "ShipmentCreated");
    }

    #[tokio::test]
    async fn test_unknown_order_is_fatal() {
        let (service, _, _) = setup();
        let result = service
            .store()
            .process_once(&service, &captured_envelope(AggregateId::new()))
            .await;

        assert!(matches!(
            result,
            Err(messaging::MessagingError::Handler(HandlerError::Fatal(_)))
        ));
        assert_eq!(service.store().read(|s| s.shipments.len()).await, 0);
    }

    #[tokio::test]
    async fn test_booking_success() {
        let (service, orders, carrier) = setup();
        let order_id = register_order(&orders);
        let shipment_id = create_shipment(&service, order_id).await;

        pump_booking(&service).await;

        let shipment = service.get_shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::LabelBooked);
        assert_eq!(shipment.carrier(), Some("FastShip"));
        assert!(shipment.tracking_number().unwrap().starts_with("TRACK-"));
        assert_eq!(carrier.booking_count(), 1);

        let records = service.store().outbox_records().await;
        let types: Vec<&str> = records.iter().map(|r| r.envelope.event_type.as_str()).collect();
        assert_eq!(types, vec!["ShipmentCreated", "ShipmentBooked"]);
    }

    #[tokio::test]
    async fn test_booking_refused() {
        let (service, orders, carrier) = setup();
        carrier.set_refuse_booking(true);
        let order_id = register_order(&orders);
        let shipment_id = create_shipment(&service, order_id).await;

        pump_booking(&service).await;

        let shipment = service.get_shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::BookingFailed);
        assert_eq!(shipment.failure_reason(), Some("no capacity"));
        assert!(shipment.tracking_number().is_none());

        let records = service.store().outbox_records().await;
        assert!(records
            .iter()
            .any(|r| r.envelope.event_type == "ShipmentBookingFailed"));
    }

    #[tokio::test]
    async fn test_duplicate_captured_event_creates_one_shipment() {
        let (service, orders, _) = setup();
        let order_id = register_order(&orders);

        // Two distinct PaymentCaptured messages for the same order
        for _ in 0..2 {
            service
                .store()
                .process_once(&service, &captured_envelope(order_id))
                .await
                .unwrap();
        }

        assert_eq!(service.store().read(|s| s.shipments.len()).await, 1);
    }

    #[tokio::test]
    async fn test_dispatch_and_deliver_commands() {
        let (service, orders, _) = setup();
        let order_id = register_order(&orders);
        let shipment_id = create_shipment(&service, order_id).await;
        pump_booking(&service).await;

        service.mark_dispatched(shipment_id).await.unwrap();
        let shipment = service.get_shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::Dispatched);

        service.mark_delivered(shipment_id).await.unwrap();
        let shipment = service.get_shipment(shipment_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::Delivered);

        let records = service.store().outbox_records().await;
        let types: Vec<&str> = records.iter().map(|r| r.envelope.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "ShipmentCreated",
                "ShipmentBooked",
                "ShipmentDispatched",
                "ShipmentDelivered"
            ]
        );

        // Causal chain: each event is caused by the previous one.
        assert_eq!(
            records[2].envelope.causation_id,
            Some(records[1].envelope.message_id)
        );
        assert_eq!(
            records[3].envelope.causation_id,
            Some(records[2].envelope.message_id)
        );
    }

    #[tokio::test]
    async fn test_dispatch_is_idempotent() {
        let (service, orders, _) = setup();
        let order_id = register_order(&orders);
        let shipment_id = create_shipment(&service, order_id).await;
        pump_booking(&service).await;

        service.mark_dispatched(shipment_id).await.unwrap();
        service.mark_dispatched(shipment_id).await.unwrap();

        let records = service.store().outbox_records().await;
        let dispatched = records
            .iter()
            .filter(|r| r.envelope.event_type == "ShipmentDispatched")
            .count();
        assert_eq!(dispatched, 1);
    }

    #[tokio::test]
    async fn test_dispatch_before_booking_fails() {
        let (service, orders, _) = setup();
        let order_id = register_order(&orders);
        let shipment_id = create_shipment(&service, order_id).await;

        let result = service.mark_dispatched(shipment_id).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_shipment_fails() {
        let (service, _, _) = setup();
        let result = service.mark_dispatched(AggregateId::new()).await;
        assert!(matches!(result, Err(SagaError::ShipmentNotFound(_))));
    }

    #[tokio::test]
    async fn test_transient_carrier_fault_commits_nothing() {
        let (service, orders, carrier) = setup();
        carrier.set_fail_transport(true);
        let order_id = register_order(&orders);
        create_shipment(&service, order_id).await;

        let records = service.store().outbox_records().await;
        let created = records
            .iter()
            .find(|r| r.envelope.event_type == "ShipmentCreated")
            .unwrap()
            .clone();

        let result = service
            .store()
            .process_once(&service, &created.envelope)
            .await;
        assert!(result.is_err());

        // Shipment untouched; the message will be redelivered.
        let shipment = service.get_shipment_for_order(order_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::Created);

        carrier.set_fail_transport(false);
        service
            .store()
            .process_once(&service, &created.envelope)
            .await
            .unwrap();
        let shipment = service.get_shipment_for_order(order_id).await.unwrap();
        assert_eq!(shipment.status(), ShipmentStatus::LabelBooked);
    }
}
