//! Integration events: the shared vocabulary the services react to.
//!
//! Each event describes a fact one service committed; downstream services
//! subscribe by event type. Events travel inside an
//! [`EventEnvelope`](messaging::EventEnvelope), which carries the
//! correlation and causation identifiers for the saga instance.

use common::{AggregateId, CorrelationId, MessageId};
use messaging::EventEnvelope;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Money, OrderItem, ProductId};

/// A line item as carried inside integration events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLineItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit.
    pub unit_price: Money,
}

impl From<&OrderItem> for EventLineItem {
    fn from(item: &OrderItem) -> Self {
        Self {
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

impl From<&EventLineItem> for OrderItem {
    fn from(item: &EventLineItem) -> Self {
        OrderItem::new(item.product_id.clone(), item.quantity, item.unit_price)
    }
}

/// Events published between the fulfillment services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IntegrationEvent {
    /// An order was placed; the saga starts here.
    OrderPlaced(OrderPlacedData),

    /// All line items were reserved.
    InventoryReserved(InventoryReservedData),

    /// At least one line item could not be reserved; nothing was decremented.
    InventoryReservationFailed(InventoryReservationFailedData),

    /// Compensation: return previously reserved stock.
    InventoryReleaseRequested(InventoryReleaseRequestedData),

    /// The payment gateway authorized the amount.
    PaymentAuthorized(PaymentAuthorizedData),

    /// The payment gateway captured the amount.
    PaymentCaptured(PaymentCapturedData),

    /// The payment failed or was declined.
    PaymentFailed(PaymentFailedData),

    /// The delivery service created a shipment.
    ShipmentCreated(ShipmentCreatedData),

    /// The carrier booked a label.
    ShipmentBooked(ShipmentBookedData),

    /// The carrier refused the booking.
    ShipmentBookingFailed(ShipmentBookingFailedData),

    /// The shipment was handed to the carrier.
    ShipmentDispatched(ShipmentDispatchedData),

    /// The shipment reached the customer.
    ShipmentDelivered(ShipmentDeliveredData),
}

/// Data for OrderPlaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    /// The order that was placed.
    pub order_id: AggregateId,

    /// The items to reserve and later ship.
    pub items: Vec<EventLineItem>,
}

/// Data for InventoryReserved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservedData {
    /// The order the reservation belongs to.
    pub order_id: AggregateId,

    /// Order total, forwarded for payment.
    pub total_amount: Money,
}

/// Data for InventoryReservationFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReservationFailedData {
    /// The order whose reservation failed.
    pub order_id: AggregateId,

    /// Why the reservation was refused.
    pub reason: String,
}

/// Data for InventoryReleaseRequested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReleaseRequestedData {
    /// The order whose reservation is being undone.
    pub order_id: AggregateId,

    /// The items to return to stock.
    pub items: Vec<EventLineItem>,
}

/// Data for PaymentAuthorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAuthorizedData {
    /// The order being paid.
    pub order_id: AggregateId,

    /// The payment aggregate.
    pub payment_id: AggregateId,

    /// Authorized amount.
    pub amount: Money,

    /// Gateway confirmation code.
    pub confirmation_code: String,
}

/// Data for PaymentCaptured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    /// The order being paid.
    pub order_id: AggregateId,

    /// The payment aggregate.
    pub payment_id: AggregateId,

    /// Captured amount.
    pub amount: Money,

    /// Gateway confirmation code.
    pub confirmation_code: String,
}

/// Data for PaymentFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    /// The order whose payment failed.
    pub order_id: AggregateId,

    /// The payment aggregate, when one was created before the failure.
    pub payment_id: Option<AggregateId>,

    /// The gateway's decline reason.
    pub reason: String,
}

/// Data for ShipmentCreated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentCreatedData {
    /// The order being shipped.
    pub order_id: AggregateId,

    /// The new shipment aggregate.
    pub shipment_id: AggregateId,
}

/// Data for ShipmentBooked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentBookedData {
    /// The order being shipped.
    pub order_id: AggregateId,

    /// The shipment that was booked.
    pub shipment_id: AggregateId,

    /// The carrier that accepted the booking.
    pub carrier: String,

    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Data for ShipmentBookingFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentBookingFailedData {
    /// The order being shipped.
    pub order_id: AggregateId,

    /// The shipment whose booking failed.
    pub shipment_id: AggregateId,

    /// The carrier's refusal reason.
    pub reason: String,
}

/// Data for ShipmentDispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentDispatchedData {
    /// The order being shipped.
    pub order_id: AggregateId,

    /// The dispatched shipment.
    pub shipment_id: AggregateId,
}

/// Data for ShipmentDelivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentDeliveredData {
    /// The delivered order.
    pub order_id: AggregateId,

    /// The delivered shipment.
    pub shipment_id: AggregateId,
}

impl IntegrationEvent {
    /// Returns the event type name, used as the broker subject.
    pub fn event_type(&self) -> &'static str {
        match self {
            IntegrationEvent::OrderPlaced(_) => "OrderPlaced",
            IntegrationEvent::InventoryReserved(_) => "InventoryReserved",
            IntegrationEvent::InventoryReservationFailed(_) => "InventoryReservationFailed",
            IntegrationEvent::InventoryReleaseRequested(_) => "InventoryReleaseRequested",
            IntegrationEvent::PaymentAuthorized(_) => "PaymentAuthorized",
            IntegrationEvent::PaymentCaptured(_) => "PaymentCaptured",
            IntegrationEvent::PaymentFailed(_) => "PaymentFailed",
            IntegrationEvent::ShipmentCreated(_) => "ShipmentCreated",
            IntegrationEvent::ShipmentBooked(_) => "ShipmentBooked",
            IntegrationEvent::ShipmentBookingFailed(_) => "ShipmentBookingFailed",
            IntegrationEvent::ShipmentDispatched(_) => "ShipmentDispatched",
            IntegrationEvent::ShipmentDelivered(_) => "ShipmentDelivered",
        }
    }

    /// Wraps the event in an envelope for the outbox.
    ///
    /// `causation` must be the message ID of the event being handled, or
    /// None only for the saga-initiating `OrderPlaced`.
    pub fn into_envelope(
        self,
        correlation_id: CorrelationId,
        causation_id: Option<MessageId>,
    ) -> Result<EventEnvelope, serde_json::Error> {
        let event_type = self.event_type();
        let mut builder = EventEnvelope::builder()
            .correlation_id(correlation_id)
            .event_type(event_type)
            .payload(&self)?;
        if let Some(causation_id) = causation_id {
            builder = builder.causation_id(causation_id);
        }
        Ok(builder.build())
    }

    /// Decodes an event from a received envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        serde_json::from_value(envelope.payload.clone())
    }
}

// Convenience constructors
impl IntegrationEvent {
    /// Creates an OrderPlaced event.
    pub fn order_placed(order_id: AggregateId, items: &[OrderItem]) -> Self {
        IntegrationEvent::OrderPlaced(OrderPlacedData {
            order_id,
            items: items.iter().map(EventLineItem::from).collect(),
        })
    }

    /// Creates an InventoryReserved event.
    pub fn inventory_reserved(order_id: AggregateId, total_amount: Money) -> Self {
        IntegrationEvent::InventoryReserved(InventoryReservedData {
            order_id,
            total_amount,
        })
    }

    /// Creates an InventoryReservationFailed event.
    pub fn inventory_reservation_failed(order_id: AggregateId, reason: impl Into<String>) -> Self {
        IntegrationEvent::InventoryReservationFailed(InventoryReservationFailedData {
            order_id,
            reason: reason.into(),
        })
    }

    /// Creates an InventoryReleaseRequested event.
    pub fn inventory_release_requested(order_id: AggregateId, items: &[OrderItem]) -> Self {
        IntegrationEvent::InventoryReleaseRequested(InventoryReleaseRequestedData {
            order_id,
            items: items.iter().map(EventLineItem::from).collect(),
        })
    }

    /// Creates a PaymentAuthorized event.
    pub fn payment_authorized(
        order_id: AggregateId,
        payment_id: AggregateId,
        amount: Money,
        confirmation_code: impl Into<String>,
    ) -> Self {
        IntegrationEvent::PaymentAuthorized(PaymentAuthorizedData {
            order_id,
            payment_id,
            amount,
            confirmation_code: confirmation_code.into(),
        })
    }

    /// Creates a PaymentCaptured event.
    pub fn payment_captured(
        order_id: AggregateId,
        payment_id: AggregateId,
        amount: Money,
        confirmation_code: impl Into<String>,
    ) -> Self {
        IntegrationEvent::PaymentCaptured(PaymentCapturedData {
            order_id,
            payment_id,
            amount,
            confirmation_code: confirmation_code.into(),
        })
    }

    /// Creates a PaymentFailed event.
    pub fn payment_failed(
        order_id: AggregateId,
        payment_id: Option<AggregateId>,
        reason: impl Into<String>,
    ) -> Self {
        IntegrationEvent::PaymentFailed(PaymentFailedData {
            order_id,
            payment_id,
            reason: reason.into(),
        })
    }

    /// Creates a ShipmentCreated event.
    pub fn shipment_created(order_id: AggregateId, shipment_id: AggregateId) -> Self {
        IntegrationEvent::ShipmentCreated(ShipmentCreatedData {
            order_id,
            shipment_id,
        })
    }

    /// Creates a ShipmentBooked event.
    pub fn shipment_booked(
        order_id: AggregateId,
        shipment_id: AggregateId,
        carrier: impl Into<String>,
        tracking_number: impl Into<String>,
    ) -> Self {
        IntegrationEvent::ShipmentBooked(ShipmentBookedData {
            order_id,
            shipment_id,
            carrier: carrier.into(),
            tracking_number: tracking_number.into(),
        })
    }

    /// Creates a ShipmentBookingFailed event.
    pub fn shipment_booking_failed(
        order_id: AggregateId,
        shipment_id: AggregateId,
        reason: impl Into<String>,
    ) -> Self {
        IntegrationEvent::ShipmentBookingFailed(ShipmentBookingFailedData {
            order_id,
            shipment_id,
            reason: reason.into(),
        })
    }

    /// Creates a ShipmentDispatched event.
    pub fn shipment_dispatched(order_id: AggregateId, shipment_id: AggregateId) -> Self {
        IntegrationEvent::ShipmentDispatched(ShipmentDispatchedData {
            order_id,
            shipment_id,
        })
    }

    /// Creates a ShipmentDelivered event.
    pub fn shipment_delivered(order_id: AggregateId, shipment_id: AggregateId) -> Self {
        IntegrationEvent::ShipmentDelivered(ShipmentDeliveredData {
            order_id,
            shipment_id,
        })
    }
}
