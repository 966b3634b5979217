//! Order service: owns the Order aggregate and anchors the saga.
//!
//! The place-order command creates the aggregate and enqueues the
//! saga-initiating `OrderPlaced` in one transaction. After that the order
//! is mutated only by this service's consumer reacting to downstream
//! events, advancing the status machine and requesting compensation when
//! payment fails.

use std::collections::HashMap;

use async_trait::async_trait;
use common::AggregateId;
use domain::{
    Address, CustomerId, IntegrationEvent, Order, OrderError, OrderItem, OrderStatus,
};
use messaging::{EventConsumer, EventEnvelope, HandlerError, InMemoryStore, TransactionScope};

use crate::error::{Result, SagaError};
use crate::gateways::{OrderDetails, OrderDetailsClient};

/// Local state owned by the order service.
#[derive(Debug, Clone, Default)]
pub struct OrderServiceState {
    orders: HashMap<AggregateId, Order>,
}

/// The order service.
pub struct OrderService {
    store: InMemoryStore<OrderServiceState>,
}

impl OrderService {
    /// Event types this service reacts to.
    pub const SUBSCRIPTIONS: &'static [&'static str] = &[
        "InventoryReserved",
        "InventoryReservationFailed",
        "PaymentAuthorized",
        "PaymentCaptured",
        "PaymentFailed",
        "ShipmentCreated",
        "ShipmentDispatched",
        "ShipmentDelivered",
    ];

    /// Creates the service with an empty store.
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(OrderServiceState::default()),
        }
    }

    /// Returns the service's local store.
    pub fn store(&self) -> &InMemoryStore<OrderServiceState> {
        &self.store
    }

    /// Places a new order.
    ///
    /// The aggregate insert and the `OrderPlaced` enqueue commit in one
    /// transaction; a validation failure leaves no trace anywhere.
    #[tracing::instrument(skip(self, shipping_address, items))]
    pub async fn place_order(
        &self,
        customer_id: CustomerId,
        shipping_address: Address,
        items: Vec<OrderItem>,
    ) -> Result<AggregateId> {
        let order_id = self
            .store
            .transact(|tx| {
                let order_id = AggregateId::new();
                let order = Order::place(order_id, customer_id, shipping_address, items)?;

                let event = IntegrationEvent::order_placed(order_id, order.items());
                tx.enqueue(event.into_envelope(order_id.into(), None)?);
                tx.state_mut().orders.insert(order_id, order);

                Ok::<_, SagaError>(order_id)
            })
            .await?;

        metrics::counter!("orders_placed").increment(1);
        tracing::info!(%order_id, "order placed");
        Ok(order_id)
    }

    /// Cancels an order. Allowed only while nothing irreversible happened.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: AggregateId,
        reason: impl Into<String> + std::fmt::Debug,
    ) -> Result<()> {
        let reason = reason.into();
        self.store
            .transact(move |tx| {
                let order = tx
                    .state_mut()
                    .orders
                    .get_mut(&order_id)
                    .ok_or(SagaError::OrderNotFound(order_id))?;
                order.cancel(reason)?;
                Ok::<_, SagaError>(())
            })
            .await?;

        metrics::counter!("orders_cancelled").increment(1);
        Ok(())
    }

    /// Returns a copy of the order, if it exists.
    pub async fn get_order(&self, order_id: AggregateId) -> Option<Order> {
        self.store
            .read(|s| s.orders.get(&order_id).cloned())
            .await
    }
}

impl Default for OrderService {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only lookup used by the delivery service when creating a shipment.
#[async_trait]
impl OrderDetailsClient for OrderService {
    async fn fetch(&self, order_id: AggregateId) -> Result<Option<OrderDetails>> {
        Ok(self
            .store
            .read(|s| {
                s.orders.get(&order_id).map(|order| OrderDetails {
                    order_id,
                    shipping_address: order.shipping_address().clone(),
                    items: order.items().to_vec(),
                })
            })
            .await)
    }
}

/// Applies one guarded transition toward `target`.
///
/// A rejected transition is classified by the fulfillment rank: if the
/// order has not yet reached the status the event presumes (a
/// causally-later event from another producer overtook its predecessor),
/// the failure is transient and the redelivery schedule lets the aggregate
/// catch up. Anything else (duplicate, stale, or a saga already failed)
/// is an idempotency signal and a no-op.
///
/// Returns true if the transition was applied.
fn apply_transition(
    tx: &mut TransactionScope<OrderServiceState>,
    order_id: AggregateId,
    target: OrderStatus,
    f: impl FnOnce(&mut Order) -> std::result::Result<(), OrderError>,
) -> std::result::Result<bool, HandlerError> {
    let Some(order) = tx.state_mut().orders.get_mut(&order_id) else {
        return Err(HandlerError::Fatal(format!("unknown order {order_id}")));
    };

    match f(order) {
        Ok(()) => Ok(true),
        Err(OrderError::InvalidStateTransition {
            current_status,
            action,
        }) => {
            if let (Some(current), Some(target_rank)) =
                (current_status.fulfillment_rank(), target.fulfillment_rank())
                && current < target_rank.saturating_sub(1)
            {
                return Err(HandlerError::Transient(format!(
                    "order {order_id} is {current_status}, not ready for {target}"
                )));
            }

            tracing::debug!(%order_id, %current_status, action, "transition rejected, skipping");
            metrics::counter!("order_transitions_rejected").increment(1);
            Ok(false)
        }
        Err(e) => Err(HandlerError::Fatal(e.to_string())),
    }
}

#[async_trait]
impl EventConsumer<OrderServiceState> for OrderService {
    fn name(&self) -> &'static str {
        "order-service"
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<OrderServiceState>,
    ) -> std::result::Result<(), HandlerError> {
        let event = IntegrationEvent::from_envelope(envelope)
            .map_err(|e| HandlerError::Fatal(format!("undecodable payload: {e}")))?;

        match event {
            IntegrationEvent::InventoryReserved(data) => {
                apply_transition(tx, data.order_id, OrderStatus::InventoryReserved, |order| {
                    order.mark_inventory_reserved()
                })?;
            }
            IntegrationEvent::InventoryReservationFailed(data) => {
                apply_transition(
                    tx,
                    data.order_id,
                    OrderStatus::InventoryReservationFailed,
                    |order| order.mark_reservation_failed(&data.reason),
                )?;
            }
            IntegrationEvent::PaymentAuthorized(data) => {
                apply_transition(tx, data.order_id, OrderStatus::PaymentAuthorized, |order| {
                    order.mark_payment_authorized()
                })?;
            }
            IntegrationEvent::PaymentCaptured(data) => {
                apply_transition(tx, data.order_id, OrderStatus::PaymentCaptured, |order| {
                    order.mark_payment_captured()
                })?;
            }
            IntegrationEvent::PaymentFailed(data) => {
                // A payment only ever runs after a successful reservation,
                // so an order still Pending has not caught up with its
                // InventoryReserved yet; applying the failure now would
                // lose the compensation. Wait for redelivery instead.
                if tx
                    .state()
                    .orders
                    .get(&data.order_id)
                    .is_some_and(|order| order.status() == OrderStatus::Pending)
                {
                    return Err(HandlerError::Transient(format!(
                        "order {} has not recorded its reservation yet",
                        data.order_id
                    )));
                }

                // Stock is only held in these statuses; once the saga moved
                // past capture there is nothing left to release.
                let held_reservation = tx
                    .state()
                    .orders
                    .get(&data.order_id)
                    .is_some_and(|order| {
                        matches!(
                            order.status(),
                            OrderStatus::InventoryReserved | OrderStatus::PaymentAuthorized
                        )
                    });

                let applied = apply_transition(tx, data.order_id, OrderStatus::PaymentFailed, |order| {
                    order.mark_payment_failed(&data.reason)
                })?;

                if applied && held_reservation {
                    let items = tx
                        .state()
                        .orders
                        .get(&data.order_id)
                        .map(|order| order.items().to_vec())
                        .unwrap_or_default();

                    let release =
                        IntegrationEvent::inventory_release_requested(data.order_id, &items);
                    tx.enqueue(
                        release
                            .into_envelope(envelope.correlation_id, Some(envelope.message_id))
                            .map_err(|e| HandlerError::Fatal(e.to_string()))?,
                    );

                    metrics::counter!("order_compensations_requested").increment(1);
                    tracing::info!(
                        order_id = %data.order_id,
                        reason = %data.reason,
                        "payment failed, requesting inventory release"
                    );
                }
            }
            IntegrationEvent::ShipmentCreated(data) => {
                apply_transition(tx, data.order_id, OrderStatus::ShipmentCreated, |order| {
                    order.mark_shipment_created()
                })?;
            }
            IntegrationEvent::ShipmentDispatched(data) => {
                apply_transition(tx, data.order_id, OrderStatus::ShipmentDispatched, |order| {
                    order.mark_shipment_dispatched()
                })?;
            }
            IntegrationEvent::ShipmentDelivered(data) => {
                if apply_transition(tx, data.order_id, OrderStatus::Delivered, |order| {
                    order.mark_delivered()
                })? {
                    metrics::counter!("orders_delivered").increment(1);
                    tracing::info!(order_id = %data.order_id, "order delivered");
                }
            }
            // ShipmentBooked / ShipmentBookingFailed / OrderPlaced /
            // InventoryReleaseRequested are not subscribed by this service.
            other => {
                tracing::warn!(
                    event_type = other.event_type(),
                    "unexpected event type for order service"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Money;
    use messaging::{CorrelationId, ProcessOutcome};

    fn test_address() -> Address {
        Address::new("1 Main St", "Springfield", "12345", "US")
    }

    fn test_items() -> Vec<OrderItem> {
        vec![OrderItem::new("SKU-001", 2, Money::from_cents(1000))]
    }

    async fn place(service: &OrderService) -> AggregateId {
        service
            .place_order(CustomerId::new(), test_address(), test_items())
            .await
            .unwrap()
    }

    fn envelope_for(event: IntegrationEvent, order_id: AggregateId) -> EventEnvelope {
        event
            .into_envelope(CorrelationId::from(order_id), Some(messaging::MessageId::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_place_order_creates_pending_order_and_outbox_row() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);

        let records = service.store().outbox_records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].envelope.event_type, "OrderPlaced");
        assert!(records[0].envelope.is_initiating());
        assert_eq!(
            records[0].envelope.correlation_id.as_uuid(),
            order_id.as_uuid()
        );
    }

    #[tokio::test]
    async fn test_invalid_order_leaves_no_trace() {
        let service = OrderService::new();
        let result = service
            .place_order(CustomerId::new(), test_address(), vec![])
            .await;

        assert!(matches!(
            result,
            Err(SagaError::Domain(domain::DomainError::Order(
                OrderError::NoItems
            )))
        ));
        assert_eq!(service.store().pending_count().await, 0);
        assert_eq!(service.store().read(|s| s.orders.len()).await, 0);
    }

    #[tokio::test]
    async fn test_inventory_reserved_advances_order() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let envelope = envelope_for(
            IntegrationEvent::inventory_reserved(order_id, Money::from_cents(2000)),
            order_id,
        );
        let outcome = service
            .store()
            .process_once(&service, &envelope)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Applied);
        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::InventoryReserved);
    }

    #[tokio::test]
    async fn test_duplicate_event_is_noop() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let envelope = envelope_for(
            IntegrationEvent::inventory_reserved(order_id, Money::from_cents(2000)),
            order_id,
        );

        for expected in [ProcessOutcome::Applied, ProcessOutcome::Skipped] {
            let outcome = service
                .store()
                .process_once(&service, &envelope)
                .await
                .unwrap();
            assert_eq!(outcome, expected);
        }

        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::InventoryReserved);
        assert_eq!(service.store().inbox_len().await, 1);
    }

    #[tokio::test]
    async fn test_premature_event_is_retryable() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        // Payment captured arrives while the order is still Pending: the
        // aggregate has not caught up, so nothing commits and the message
        // stays eligible for redelivery.
        let envelope = envelope_for(
            IntegrationEvent::payment_captured(
                order_id,
                AggregateId::new(),
                Money::from_cents(2000),
                "CAP-0001",
            ),
            order_id,
        );
        let result = service.store().process_once(&service, &envelope).await;

        assert!(matches!(
            result,
            Err(messaging::MessagingError::Handler(HandlerError::Transient(_)))
        ));
        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(service.store().inbox_len().await, 0);
    }

    #[tokio::test]
    async fn test_stale_event_is_swallowed() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        for event in [
            IntegrationEvent::inventory_reserved(order_id, Money::from_cents(2000)),
            IntegrationEvent::payment_authorized(
                order_id,
                AggregateId::new(),
                Money::from_cents(2000),
                "AUTH-0001",
            ),
        ] {
            service
                .store()
                .process_once(&service, &envelope_for(event, order_id))
                .await
                .unwrap();
        }

        // A second InventoryReserved with a fresh message id arrives late:
        // the order is already past it, so it is consumed as a no-op.
        let stale = envelope_for(
            IntegrationEvent::inventory_reserved(order_id, Money::from_cents(2000)),
            order_id,
        );
        let outcome = service
            .store()
            .process_once(&service, &stale)
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Applied);
        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::PaymentAuthorized);
    }

    #[tokio::test]
    async fn test_payment_failed_after_reservation_requests_release() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let reserved = envelope_for(
            IntegrationEvent::inventory_reserved(order_id, Money::from_cents(2000)),
            order_id,
        );
        service
            .store()
            .process_once(&service, &reserved)
            .await
            .unwrap();

        let failed = envelope_for(
            IntegrationEvent::payment_failed(order_id, None, "card declined"),
            order_id,
        );
        service
            .store()
            .process_once(&service, &failed)
            .await
            .unwrap();

        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::PaymentFailed);
        assert_eq!(order.failure_reason(), Some("card declined"));

        // Compensation enqueued with causal linkage to the failure event
        let records = service.store().outbox_records().await;
        let release = records
            .iter()
            .find(|r| r.envelope.event_type == "InventoryReleaseRequested")
            .expect("release event enqueued");
        assert_eq!(release.envelope.causation_id, Some(failed.message_id));
        assert_eq!(release.envelope.correlation_id, failed.correlation_id);
    }

    #[tokio::test]
    async fn test_reservation_failure_does_not_request_release() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let failed = envelope_for(
            IntegrationEvent::inventory_reservation_failed(order_id, "insufficient stock"),
            order_id,
        );
        service
            .store()
            .process_once(&service, &failed)
            .await
            .unwrap();

        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::InventoryReservationFailed);

        let records = service.store().outbox_records().await;
        assert!(
            !records
                .iter()
                .any(|r| r.envelope.event_type == "InventoryReleaseRequested")
        );
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let failed = envelope_for(
            IntegrationEvent::inventory_reservation_failed(order_id, "insufficient stock"),
            order_id,
        );
        service
            .store()
            .process_once(&service, &failed)
            .await
            .unwrap();

        service.cancel_order(order_id, "customer gave up").await.unwrap();

        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_fails() {
        let service = OrderService::new();
        let result = service.cancel_order(AggregateId::new(), "nope").await;
        assert!(matches!(result, Err(SagaError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_order_details_lookup() {
        let service = OrderService::new();
        let order_id = place(&service).await;

        let details = service.fetch(order_id).await.unwrap().unwrap();
        assert_eq!(details.order_id, order_id);
        assert_eq!(details.items.len(), 1);
        assert!(details.shipping_address.is_complete());

        assert!(service.fetch(AggregateId::new()).await.unwrap().is_none());
    }
}
