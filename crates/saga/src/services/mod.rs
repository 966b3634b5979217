//! The four bounded contexts, each owning its local store, its commands,
//! and an inbox-wrapped consumer for the events it subscribes to.

pub mod delivery;
pub mod inventory;
pub mod order;
pub mod payment;

pub use delivery::{DeliveryService, DeliveryServiceState};
pub use inventory::{InventoryService, InventoryServiceState};
pub use order::{OrderService, OrderServiceState};
pub use payment::{PaymentService, PaymentServiceState};
