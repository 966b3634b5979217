//! Shipment aggregate.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_objects::{Address, OrderItem};

/// The status of a shipment.
///
/// Status transitions:
/// ```text
/// Created ──► LabelBooked ──► Dispatched ──► InTransit ──► Delivered
///    │                            │                            ▲
///    │                            └────────────────────────────┘
///    ▼
/// BookingFailed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ShipmentStatus {
    /// Shipment created, awaiting carrier booking.
    #[default]
    Created,

    /// Carrier booked a label and assigned a tracking number.
    LabelBooked,

    /// Handed to the carrier.
    Dispatched,

    /// Moving through the carrier network.
    InTransit,

    /// Delivered to the customer (terminal).
    Delivered,

    /// Carrier refused the booking (terminal failure).
    BookingFailed,
}

impl ShipmentStatus {
    /// Returns true if a label can be booked in this status.
    pub fn can_book(&self) -> bool {
        matches!(self, ShipmentStatus::Created)
    }

    /// Returns true if the shipment can be dispatched in this status.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, ShipmentStatus::LabelBooked)
    }

    /// Returns true if the shipment can be marked in transit in this status.
    pub fn can_mark_in_transit(&self) -> bool {
        matches!(self, ShipmentStatus::Dispatched)
    }

    /// Returns true if the shipment can be delivered in this status.
    pub fn can_deliver(&self) -> bool {
        matches!(self, ShipmentStatus::Dispatched | ShipmentStatus::InTransit)
    }

    /// Returns true if the shipment is at or past the given status on the
    /// happy path.
    pub fn is_at_or_past(&self, other: ShipmentStatus) -> bool {
        fn rank(status: ShipmentStatus) -> Option<u8> {
            match status {
                ShipmentStatus::Created => Some(0),
                ShipmentStatus::LabelBooked => Some(1),
                ShipmentStatus::Dispatched => Some(2),
                ShipmentStatus::InTransit => Some(3),
                ShipmentStatus::Delivered => Some(4),
                ShipmentStatus::BookingFailed => None,
            }
        }

        match (rank(*self), rank(other)) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::BookingFailed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Created => "Created",
            ShipmentStatus::LabelBooked => "LabelBooked",
            ShipmentStatus::Dispatched => "Dispatched",
            ShipmentStatus::InTransit => "InTransit",
            ShipmentStatus::Delivered => "Delivered",
            ShipmentStatus::BookingFailed => "BookingFailed",
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during shipment operations.
#[derive(Debug, Error)]
pub enum ShipmentError {
    /// The shipment is not in a status that admits the transition.
    #[error("Invalid state transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: ShipmentStatus,
        action: &'static str,
    },

    /// Shipment has no items.
    #[error("Shipment has no items")]
    NoItems,
}

/// Shipment aggregate root.
///
/// Carrier and tracking number are set only on a successful booking; the
/// failure reason only on a failed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    id: AggregateId,
    order_id: AggregateId,
    address: Address,
    items: Vec<OrderItem>,
    status: ShipmentStatus,
    carrier: Option<String>,
    tracking_number: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Creates a shipment for an order.
    pub fn create(
        order_id: AggregateId,
        address: Address,
        items: Vec<OrderItem>,
    ) -> Result<Self, ShipmentError> {
        if items.is_empty() {
            return Err(ShipmentError::NoItems);
        }

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            order_id,
            address,
            items,
            status: ShipmentStatus::Created,
            carrier: None,
            tracking_number: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns the shipment ID.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Returns the order this shipment fulfills.
    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    /// Returns the destination address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns the shipped items.
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Returns the current status.
    pub fn status(&self) -> ShipmentStatus {
        self.status
    }

    /// Returns the carrier, once booked.
    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    /// Returns the tracking number, once booked.
    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    /// Returns the booking failure reason, if booking failed.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    fn transition(&mut self, status: ShipmentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Records a successful carrier booking.
    pub fn book_label(
        &mut self,
        carrier: impl Into<String>,
        tracking_number: impl Into<String>,
    ) -> Result<(), ShipmentError> {
        if !self.status.can_book() {
            return Err(ShipmentError::InvalidStateTransition {
                current_status: self.status,
                action: "book label",
            });
        }
        self.carrier = Some(carrier.into());
        self.tracking_number = Some(tracking_number.into());
        self.transition(ShipmentStatus::LabelBooked);
        Ok(())
    }

    /// Records a failed carrier booking.
    pub fn fail_booking(&mut self, reason: impl Into<String>) -> Result<(), ShipmentError> {
        if !self.status.can_book() {
            return Err(ShipmentError::InvalidStateTransition {
                current_status: self.status,
                action: "fail booking",
            });
        }
        self.failure_reason = Some(reason.into());
        self.transition(ShipmentStatus::BookingFailed);
        Ok(())
    }

    /// Marks the shipment as dispatched.
    pub fn dispatch(&mut self) -> Result<(), ShipmentError> {
        if !self.status.can_dispatch() {
            return Err(ShipmentError::InvalidStateTransition {
                current_status: self.status,
                action: "dispatch",
            });
        }
        self.transition(ShipmentStatus::Dispatched);
        Ok(())
    }

    /// Marks the shipment as in transit.
    pub fn mark_in_transit(&mut self) -> Result<(), ShipmentError> {
        if !self.status.can_mark_in_transit() {
            return Err(ShipmentError::InvalidStateTransition {
                current_status: self.status,
                action: "mark in transit",
            });
        }
        self.transition(ShipmentStatus::InTransit);
        Ok(())
    }

    /// Marks the shipment as delivered.
    pub fn deliver(&mut self) -> Result<(), ShipmentError> {
        if !self.status.can_deliver() {
            return Err(ShipmentError::InvalidStateTransition {
                current_status: self.status,
                action: "deliver",
            });
        }
        self.transition(ShipmentStatus::Delivered);
        Ok(())
    }
}
