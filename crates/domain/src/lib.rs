//! Domain layer for the order fulfillment platform.
//!
//! This crate provides:
//! - The four aggregates (Order, InventoryItem, Payment, Shipment), each a
//!   guarded state machine whose transition methods either mutate or reject
//!   without side effects
//! - Shared value objects (Money, ProductId, OrderItem, Address)
//! - The integration event vocabulary exchanged between services

pub mod error;
pub mod events;
pub mod inventory;
pub mod order;
pub mod payment;
pub mod shipment;
pub mod value_objects;

pub use error::DomainError;
pub use events::{EventLineItem, IntegrationEvent};
pub use inventory::{InventoryError, InventoryItem};
pub use order::{Order, OrderError, OrderStatus};
pub use payment::{Payment, PaymentAttempt, PaymentError, PaymentMethod, PaymentStatus};
pub use shipment::{Shipment, ShipmentError, ShipmentStatus};
pub use value_objects::{Address, CustomerId, Money, OrderItem, ProductId};
