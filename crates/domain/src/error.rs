//! Domain error types.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::order::OrderError;
use crate::payment::PaymentError;
use crate::shipment::ShipmentError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the order aggregate.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// An error occurred in an inventory item.
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// An error occurred in the payment aggregate.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// An error occurred in the shipment aggregate.
    #[error("Shipment error: {0}")]
    Shipment(#[from] ShipmentError),

    /// Aggregate not found.
    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if this error is a guarded-transition rejection.
    ///
    /// Saga handlers treat these as idempotency signals for duplicate or
    /// out-of-order deliveries, not as failures.
    pub fn is_transition_rejection(&self) -> bool {
        matches!(
            self,
            DomainError::Order(OrderError::InvalidStateTransition { .. })
                | DomainError::Payment(PaymentError::InvalidStateTransition { .. })
                | DomainError::Shipment(ShipmentError::InvalidStateTransition { .. })
        )
    }
}
