//! Choreographed order-fulfillment saga.
//!
//! Four services (order, inventory, payment, delivery) react to each
//! other's integration events with no central coordinator:
//!
//! 1. A place-order command creates the Order and enqueues `OrderPlaced`.
//! 2. Inventory reserves stock all-or-nothing and answers with
//!    `InventoryReserved` or `InventoryReservationFailed`.
//! 3. Payment reacts to `InventoryReserved` by driving the gateway through
//!    authorize and capture, emitting `PaymentAuthorized`/`PaymentCaptured`
//!    or `PaymentFailed`.
//! 4. On `PaymentFailed` the order service requests compensation
//!    (`InventoryReleaseRequested`), undoing the reservation.
//! 5. Delivery reacts to `PaymentCaptured` by creating and booking a
//!    shipment; external dispatch/deliver commands complete the chain and
//!    the order ends `Delivered`.
//!
//! Every handler runs under the inbox guard, every emitted event goes
//! through the producer's outbox, and every gateway call is wrapped in the
//! retry + circuit-breaker policy.

pub mod error;
pub mod gateways;
pub mod platform;
pub mod policy;
pub mod services;

pub use error::{Result, SagaError};
pub use gateways::{
    BookingResponse, CarrierClient, GatewayResponse, InMemoryCarrierClient,
    InMemoryOrderDetailsClient, InMemoryPaymentGateway, OrderDetails, OrderDetailsClient,
    PaymentGateway,
};
pub use platform::{Platform, PlatformConfig};
pub use policy::GatewayPolicy;
pub use services::{
    DeliveryService, DeliveryServiceState, InventoryService, InventoryServiceState, OrderService,
    OrderServiceState, PaymentService, PaymentServiceState,
};
