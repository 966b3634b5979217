//! End-to-end saga tests: all four services over one in-memory broker,
//! with real relays and consumer pools running.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::AggregateId;
use domain::{
    Address, CustomerId, Money, OrderItem, OrderStatus, PaymentStatus, ProductId, ShipmentStatus,
};
use messaging::{
    CircuitBreakerConfig, ConsumerConfig, EventEnvelope, InMemoryBroker, MessageBroker,
    OutboxRecord, RelayConfig, RetryPolicy,
};
use saga::{InMemoryCarrierClient, InMemoryPaymentGateway, Platform, PlatformConfig};

fn fast_config() -> PlatformConfig {
    PlatformConfig {
        relay: RelayConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 100,
            dedup_window: Duration::from_secs(30),
        },
        consumer: ConsumerConfig {
            max_in_flight: 8,
            redelivery: RetryPolicy {
                max_attempts: 6,
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(200),
                jitter: 0.0,
            },
        },
        gateway_retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            jitter: 0.0,
        },
        breaker: CircuitBreakerConfig {
            failure_threshold: 50,
            cooldown: Duration::from_secs(30),
            success_threshold: 1,
        },
    }
}

struct Harness {
    platform: Platform,
    broker: Arc<dyn MessageBroker>,
    gateway: InMemoryPaymentGateway,
    carrier: InMemoryCarrierClient,
}

async fn start_platform() -> Harness {
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let gateway = InMemoryPaymentGateway::new();
    let carrier = InMemoryCarrierClient::new();

    let platform = Platform::start(
        Arc::clone(&broker),
        Arc::new(gateway.clone()),
        Arc::new(carrier.clone()),
        fast_config(),
    )
    .await
    .unwrap();

    Harness {
        platform,
        broker,
        gateway,
        carrier,
    }
}

fn test_address() -> Address {
    Address::new("1 Main St", "Springfield", "12345", "US")
}

async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let reached = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for: {what}");
}

async fn wait_for_order_status(platform: &Platform, order_id: AggregateId, status: OrderStatus) {
    wait_for(&format!("order status {status}"), || async move {
        platform
            .orders
            .get_order(order_id)
            .await
            .map(|order| order.status())
            == Some(status)
    })
    .await;
}

/// Collects every outbox record from all four services.
async fn all_outbox_records(platform: &Platform) -> Vec<OutboxRecord> {
    let mut records = platform.orders.store().outbox_records().await;
    records.extend(platform.inventory.store().outbox_records().await);
    records.extend(platform.payments.store().outbox_records().await);
    records.extend(platform.delivery.store().outbox_records().await);
    records
}

/// Asserts the causal invariants over a finished saga's event set: one
/// correlation id everywhere, and every non-initiating event caused by a
/// real, previously enqueued message in the same chain.
fn assert_causal_chain(records: &[OutboxRecord], order_id: AggregateId) {
    let by_message: HashMap<_, _> = records
        .iter()
        .map(|r| (r.envelope.message_id, &r.envelope))
        .collect();

    let mut initiating = 0;
    for record in records {
        let envelope = &record.envelope;
        assert_eq!(
            envelope.correlation_id.as_uuid(),
            order_id.as_uuid(),
            "correlation drifted on {}",
            envelope.event_type
        );

        match envelope.causation_id {
            None => {
                assert_eq!(envelope.event_type, "OrderPlaced");
                initiating += 1;
            }
            Some(cause) => {
                let parent = by_message
                    .get(&cause)
                    .unwrap_or_else(|| panic!("{} caused by unknown message", envelope.event_type));
                assert_eq!(parent.correlation_id, envelope.correlation_id);
            }
        }
    }
    assert_eq!(initiating, 1, "exactly one saga-initiating event");
}

#[tokio::test]
async fn happy_path_order_ends_delivered() {
    let h = start_platform().await;
    h.platform.inventory.set_stock("SKU-001", 10).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 2, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    // The chain runs to the shipment being booked with no further input.
    wait_for_order_status(&h.platform, order_id, OrderStatus::ShipmentCreated).await;
    let delivery = &h.platform.delivery;
    wait_for("shipment booked", || async move {
        delivery
            .get_shipment_for_order(order_id)
            .await
            .map(|s| s.status() == ShipmentStatus::LabelBooked)
            .unwrap_or(false)
    })
    .await;

    // Stock was decremented exactly once.
    assert_eq!(
        h.platform
            .inventory
            .stock_on_hand(&ProductId::new("SKU-001"))
            .await,
        Some(8)
    );

    // Payment captured for the derived order total.
    let payment = h
        .platform
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status(), PaymentStatus::Captured);
    assert_eq!(payment.amount().cents(), 2000);
    assert_eq!(h.gateway.authorize_count(), 1);
    assert_eq!(h.gateway.capture_count(), 1);
    assert_eq!(h.carrier.booking_count(), 1);

    // External operational commands finish the chain.
    let shipment = h
        .platform
        .delivery
        .get_shipment_for_order(order_id)
        .await
        .unwrap();
    h.platform
        .delivery
        .mark_dispatched(shipment.id())
        .await
        .unwrap();
    wait_for_order_status(&h.platform, order_id, OrderStatus::ShipmentDispatched).await;

    h.platform
        .delivery
        .mark_delivered(shipment.id())
        .await
        .unwrap();
    wait_for_order_status(&h.platform, order_id, OrderStatus::Delivered).await;

    let order = h.platform.orders.get_order(order_id).await.unwrap();
    assert!(order.is_terminal());

    // Causal chain holds across every event from every service.
    let records = all_outbox_records(&h.platform).await;
    assert_causal_chain(&records, order_id);

    h.platform.shutdown().await;
}

#[tokio::test]
async fn insufficient_stock_fails_reservation_and_never_charges() {
    let h = start_platform().await;
    h.platform.inventory.set_stock("SKU-001", 5).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 1000, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    wait_for_order_status(&h.platform, order_id, OrderStatus::InventoryReservationFailed).await;

    let order = h.platform.orders.get_order(order_id).await.unwrap();
    assert!(order.failure_reason().unwrap().contains("insufficient stock"));

    // Nothing was decremented, no payment aggregate was ever created,
    // no shipment exists.
    assert_eq!(
        h.platform
            .inventory
            .stock_on_hand(&ProductId::new("SKU-001"))
            .await,
        Some(5)
    );
    assert!(
        h.platform
            .payments
            .get_payment_for_order(order_id)
            .await
            .is_none()
    );
    assert_eq!(h.gateway.authorize_count(), 0);
    assert!(
        h.platform
            .delivery
            .get_shipment_for_order(order_id)
            .await
            .is_none()
    );

    h.platform.shutdown().await;
}

#[tokio::test]
async fn payment_decline_compensates_reservation() {
    let h = start_platform().await;
    h.gateway.set_decline_authorize(true);
    h.platform.inventory.set_stock("SKU-001", 10).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 4, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    wait_for_order_status(&h.platform, order_id, OrderStatus::PaymentFailed).await;

    // Compensation closure: on-hand returns to its pre-order value.
    let inventory = &h.platform.inventory;
    wait_for("stock restored", || async move {
        inventory.stock_on_hand(&ProductId::new("SKU-001")).await == Some(10)
    })
    .await;

    let payment = h
        .platform
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status(), PaymentStatus::Failed);
    assert_eq!(payment.attempts().len(), 1);

    // No shipment was ever created.
    assert!(
        h.platform
            .delivery
            .get_shipment_for_order(order_id)
            .await
            .is_none()
    );

    let records = all_outbox_records(&h.platform).await;
    assert_causal_chain(&records, order_id);

    h.platform.shutdown().await;
}

#[tokio::test]
async fn capture_decline_compensates_after_authorization() {
    let h = start_platform().await;
    h.gateway.set_decline_capture(true);
    h.platform.inventory.set_stock("SKU-001", 10).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 4, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    wait_for_order_status(&h.platform, order_id, OrderStatus::PaymentFailed).await;
    let inventory = &h.platform.inventory;
    wait_for("stock restored", || async move {
        inventory.stock_on_hand(&ProductId::new("SKU-001")).await == Some(10)
    })
    .await;

    let payment = h
        .platform
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status(), PaymentStatus::Failed);
    // Authorize succeeded, capture was declined.
    assert_eq!(payment.attempts().len(), 2);
    assert!(payment.attempts()[0].success);
    assert!(!payment.attempts()[1].success);

    h.platform.shutdown().await;
}

#[tokio::test]
async fn carrier_refusal_fails_booking_only() {
    let h = start_platform().await;
    h.carrier.set_refuse_booking(true);
    h.platform.inventory.set_stock("SKU-001", 10).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 2, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    let delivery = &h.platform.delivery;
    wait_for("booking failed", || async move {
        delivery
            .get_shipment_for_order(order_id)
            .await
            .map(|s| s.status() == ShipmentStatus::BookingFailed)
            .unwrap_or(false)
    })
    .await;

    let shipment = h
        .platform
        .delivery
        .get_shipment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(shipment.failure_reason(), Some("no capacity"));

    // The order reached ShipmentCreated; payment remains captured.
    wait_for_order_status(&h.platform, order_id, OrderStatus::ShipmentCreated).await;
    let payment = h
        .platform
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    assert_eq!(payment.status(), PaymentStatus::Captured);

    h.platform.shutdown().await;
}

#[tokio::test]
async fn duplicate_delivery_is_a_noop() {
    let h = start_platform().await;
    h.platform.inventory.set_stock("SKU-001", 10).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 2, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    wait_for_order_status(&h.platform, order_id, OrderStatus::ShipmentCreated).await;

    let inbox_before = h.platform.orders.store().inbox_len().await;
    let stock_before = h
        .platform
        .inventory
        .stock_on_hand(&ProductId::new("SKU-001"))
        .await;

    // Redeliver the already-processed InventoryReserved message verbatim.
    let reserved: EventEnvelope = h
        .platform
        .inventory
        .store()
        .outbox_records()
        .await
        .into_iter()
        .find(|r| r.envelope.event_type == "InventoryReserved")
        .unwrap()
        .envelope;
    h.broker
        .publish("InventoryReserved", reserved.to_bytes().unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    // Same status, same inbox size, no second charge, stock untouched.
    let order = h.platform.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::ShipmentCreated);
    assert_eq!(h.platform.orders.store().inbox_len().await, inbox_before);
    assert_eq!(h.gateway.authorize_count(), 1);
    assert_eq!(
        h.platform
            .inventory
            .stock_on_hand(&ProductId::new("SKU-001"))
            .await,
        stock_before
    );

    h.platform.shutdown().await;
}

#[tokio::test]
async fn refund_after_delivery() {
    let h = start_platform().await;
    h.platform.inventory.set_stock("SKU-001", 10).await.unwrap();

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-001", 2, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    let payments = &h.platform.payments;
    wait_for("payment captured", || async move {
        payments
            .get_payment_for_order(order_id)
            .await
            .map(|p| p.status() == PaymentStatus::Captured)
            .unwrap_or(false)
    })
    .await;

    let payment = h
        .platform
        .payments
        .get_payment_for_order(order_id)
        .await
        .unwrap();
    h.platform
        .payments
        .refund_payment(payment.id())
        .await
        .unwrap();

    let payment = h.platform.payments.get_payment(payment.id()).await.unwrap();
    assert_eq!(payment.status(), PaymentStatus::Refunded);
    assert_eq!(h.gateway.refund_count(), 1);

    h.platform.shutdown().await;
}

#[tokio::test]
async fn cancel_order_after_reservation_failure() {
    let h = start_platform().await;
    // No stock registered at all: reservation is refused.

    let order_id = h
        .platform
        .orders
        .place_order(
            CustomerId::new(),
            test_address(),
            vec![OrderItem::new("SKU-404", 1, Money::from_cents(1000))],
        )
        .await
        .unwrap();

    wait_for_order_status(&h.platform, order_id, OrderStatus::InventoryReservationFailed).await;

    h.platform
        .orders
        .cancel_order(order_id, "customer gave up")
        .await
        .unwrap();

    let order = h.platform.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert!(order.is_terminal());

    h.platform.shutdown().await;
}
