//! External collaborator clients: payment gateway, carrier, and the
//! cross-service order lookup, each with an in-memory test double.

pub mod carrier;
pub mod orders;
pub mod payment;

pub use carrier::{BookingResponse, CarrierClient, InMemoryCarrierClient};
pub use orders::{InMemoryOrderDetailsClient, OrderDetails, OrderDetailsClient};
pub use payment::{GatewayResponse, InMemoryPaymentGateway, PaymentGateway};
