//! Saga error types.

use common::AggregateId;
use domain::{DomainError, InventoryError, OrderError, PaymentError, ShipmentError};
use messaging::MessagingError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(AggregateId),

    /// Payment not found.
    #[error("Payment not found: {0}")]
    PaymentNotFound(AggregateId),

    /// Shipment not found.
    #[error("Shipment not found: {0}")]
    ShipmentNotFound(AggregateId),

    /// Product not tracked by the inventory service.
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// A gateway call could not complete (transport fault or open circuit).
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Messaging error.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<OrderError> for SagaError {
    fn from(e: OrderError) -> Self {
        SagaError::Domain(e.into())
    }
}

impl From<InventoryError> for SagaError {
    fn from(e: InventoryError) -> Self {
        SagaError::Domain(e.into())
    }
}

impl From<PaymentError> for SagaError {
    fn from(e: PaymentError) -> Self {
        SagaError::Domain(e.into())
    }
}

impl From<ShipmentError> for SagaError {
    fn from(e: ShipmentError) -> Self {
        SagaError::Domain(e.into())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
