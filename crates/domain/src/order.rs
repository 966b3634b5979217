//! Order aggregate: the saga's anchor state machine.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_objects::{Address, CustomerId, Money, OrderItem};

/// The status of an order through fulfillment.
///
/// Status transitions:
/// ```text
/// Pending ──► InventoryReserved ──► PaymentAuthorized ──► PaymentCaptured
///    │               │                      │                    │
///    │               │                      │                    ▼
///    │               │                      │             ShipmentCreated ──► ShipmentDispatched ──► Delivered
///    │               │                      │
///    │               └──────────────────────┴──► PaymentFailed
///    ▼
/// InventoryReservationFailed
///
/// Pending / InventoryReservationFailed / PaymentFailed ──► Cancelled
/// ```
///
/// `InventoryReservationFailed` and `PaymentFailed` are terminal for
/// fulfillment but remain cancellable; `Delivered` and `Cancelled` are
/// terminal outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order placed, awaiting inventory reservation.
    #[default]
    Pending,

    /// Inventory reserved, awaiting payment.
    InventoryReserved,

    /// Reservation was refused; fulfillment stops here.
    InventoryReservationFailed,

    /// Payment authorized, awaiting capture.
    PaymentAuthorized,

    /// Payment captured, awaiting shipment.
    PaymentCaptured,

    /// Payment declined or failed; compensation runs.
    PaymentFailed,

    /// Shipment created by the delivery service.
    ShipmentCreated,

    /// Shipment handed to the carrier.
    ShipmentDispatched,

    /// Order delivered (terminal).
    Delivered,

    /// Order cancelled (terminal).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if inventory outcome events can apply in this status.
    pub fn can_resolve_reservation(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a payment authorization can apply in this status.
    pub fn can_authorize_payment(&self) -> bool {
        matches!(self, OrderStatus::InventoryReserved)
    }

    /// Returns true if a payment capture can apply in this status.
    pub fn can_capture_payment(&self) -> bool {
        matches!(self, OrderStatus::PaymentAuthorized)
    }

    /// Returns true if a payment failure can apply in this status.
    ///
    /// Payment can fail at any point before fulfillment completes or the
    /// order reaches another terminal status.
    pub fn can_fail_payment(&self) -> bool {
        !matches!(
            self,
            OrderStatus::PaymentFailed
                | OrderStatus::InventoryReservationFailed
                | OrderStatus::Delivered
                | OrderStatus::Cancelled
        )
    }

    /// Returns true if a created shipment can apply in this status.
    pub fn can_create_shipment(&self) -> bool {
        matches!(self, OrderStatus::PaymentCaptured)
    }

    /// Returns true if a dispatched shipment can apply in this status.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, OrderStatus::ShipmentCreated)
    }

    /// Returns true if delivery can apply in this status.
    pub fn can_deliver(&self) -> bool {
        matches!(self, OrderStatus::ShipmentDispatched)
    }

    /// Returns true if the order can still be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::InventoryReservationFailed
                | OrderStatus::PaymentFailed
        )
    }

    /// Returns true if fulfillment has stopped in this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Position of this status along the happy path, or None for failure
    /// and cancellation statuses.
    ///
    /// Consumers use the rank to tell a premature event (the aggregate has
    /// not caught up yet; worth a redelivery) from a duplicate or stale one
    /// (already at or past the target; a no-op).
    pub fn fulfillment_rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::InventoryReserved => Some(1),
            OrderStatus::PaymentAuthorized => Some(2),
            OrderStatus::PaymentCaptured => Some(3),
            OrderStatus::ShipmentCreated => Some(4),
            OrderStatus::ShipmentDispatched => Some(5),
            OrderStatus::Delivered => Some(6),
            OrderStatus::InventoryReservationFailed
            | OrderStatus::PaymentFailed
            | OrderStatus::Cancelled => None,
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::InventoryReserved => "InventoryReserved",
            OrderStatus::InventoryReservationFailed => "InventoryReservationFailed",
            OrderStatus::PaymentAuthorized => "PaymentAuthorized",
            OrderStatus::PaymentCaptured => "PaymentCaptured",
            OrderStatus::PaymentFailed => "PaymentFailed",
            OrderStatus::ShipmentCreated => "ShipmentCreated",
            OrderStatus::ShipmentDispatched => "ShipmentDispatched",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order is not in a status that admits the transition.
    ///
    /// Saga handlers treat this as an idempotency signal for duplicate or
    /// out-of-order deliveries, not as a failure.
    #[error("Invalid state transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid unit price.
    #[error("Invalid unit price for {product_id}: {price} (must be greater than 0)")]
    InvalidPrice { product_id: String, price: i64 },

    /// Shipping address is incomplete.
    #[error("Shipping address is incomplete")]
    IncompleteAddress,
}

/// Order aggregate root.
///
/// Created by a place-order command, then mutated only by saga handlers
/// reacting to downstream events; never deleted. Line items are immutable
/// once the order is placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: AggregateId,
    customer_id: CustomerId,
    shipping_address: Address,
    items: Vec<OrderItem>,
    status: OrderStatus,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Places a new order.
    ///
    /// Validates items and address before any state exists; a rejected
    /// command has no effect anywhere.
    pub fn place(
        id: AggregateId,
        customer_id: CustomerId,
        shipping_address: Address,
        items: Vec<OrderItem>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.to_string(),
                    price: item.unit_price.cents(),
                });
            }
        }
        if !shipping_address.is_complete() {
            return Err(OrderError::IncompleteAddress);
        }

        let now = Utc::now();
        Ok(Self {
            id,
            customer_id,
            shipping_address,
            items,
            status: OrderStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns the order ID.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Returns the customer who placed the order.
    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    /// Returns the shipping address.
    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    /// Returns the line items.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the recorded failure reason, if fulfillment failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Returns when the order was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the total amount (sum of quantity × unit price).
    pub fn total_amount(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |acc, item| acc + item.total_price())
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, status: OrderStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Marks inventory as reserved.
    pub fn mark_inventory_reserved(&mut self) -> Result<(), OrderError> {
        if !self.status.can_resolve_reservation() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark inventory reserved",
            });
        }
        self.transition(OrderStatus::InventoryReserved);
        Ok(())
    }

    /// Marks the reservation as failed.
    pub fn mark_reservation_failed(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.status.can_resolve_reservation() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark reservation failed",
            });
        }
        self.failure_reason = Some(reason.into());
        self.transition(OrderStatus::InventoryReservationFailed);
        Ok(())
    }

    /// Marks the payment as authorized.
    pub fn mark_payment_authorized(&mut self) -> Result<(), OrderError> {
        if !self.status.can_authorize_payment() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark payment authorized",
            });
        }
        self.transition(OrderStatus::PaymentAuthorized);
        Ok(())
    }

    /// Marks the payment as captured.
    pub fn mark_payment_captured(&mut self) -> Result<(), OrderError> {
        if !self.status.can_capture_payment() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark payment captured",
            });
        }
        self.transition(OrderStatus::PaymentCaptured);
        Ok(())
    }

    /// Marks the payment as failed.
    pub fn mark_payment_failed(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.status.can_fail_payment() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark payment failed",
            });
        }
        self.failure_reason = Some(reason.into());
        self.transition(OrderStatus::PaymentFailed);
        Ok(())
    }

    /// Marks the shipment as created.
    pub fn mark_shipment_created(&mut self) -> Result<(), OrderError> {
        if !self.status.can_create_shipment() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark shipment created",
            });
        }
        self.transition(OrderStatus::ShipmentCreated);
        Ok(())
    }

    /// Marks the shipment as dispatched.
    pub fn mark_shipment_dispatched(&mut self) -> Result<(), OrderError> {
        if !self.status.can_dispatch() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark shipment dispatched",
            });
        }
        self.transition(OrderStatus::ShipmentDispatched);
        Ok(())
    }

    /// Marks the order as delivered.
    pub fn mark_delivered(&mut self) -> Result<(), OrderError> {
        if !self.status.can_deliver() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "mark delivered",
            });
        }
        self.transition(OrderStatus::Delivered);
        Ok(())
    }

    /// Cancels the order.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "cancel",
            });
        }
        self.failure_reason = Some(reason.into());
        self.transition(OrderStatus::Cancelled);
        Ok(())
    }
}
