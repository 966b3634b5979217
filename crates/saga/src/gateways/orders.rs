//! Synchronous order-details lookup across the service boundary.
//!
//! The delivery service reads order details (address, line items) directly
//! from the order service when creating a shipment. This is a deliberate,
//! read-only exception to choreography: it never mutates the order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::{Address, OrderItem};

use crate::error::SagaError;

/// The read-only order projection the delivery service needs.
#[derive(Debug, Clone)]
pub struct OrderDetails {
    /// The order's identity.
    pub order_id: AggregateId,

    /// Where to ship.
    pub shipping_address: Address,

    /// What to ship.
    pub items: Vec<OrderItem>,
}

/// Client for fetching order details by ID.
#[async_trait]
pub trait OrderDetailsClient: Send + Sync {
    /// Fetches order details, or None if the order does not exist.
    async fn fetch(&self, order_id: AggregateId) -> Result<Option<OrderDetails>, SagaError>;
}

/// In-memory order-details client for testing the delivery service alone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderDetailsClient {
    orders: Arc<RwLock<HashMap<AggregateId, OrderDetails>>>,
}

impl InMemoryOrderDetailsClient {
    /// Creates an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers order details to serve.
    pub fn insert(&self, details: OrderDetails) {
        self.orders.write().unwrap().insert(details.order_id, details);
    }
}

#[async_trait]
impl OrderDetailsClient for InMemoryOrderDetailsClient {
    async fn fetch(&self, order_id: AggregateId) -> Result<Option<OrderDetails>, SagaError> {
        Ok(self.orders.read().unwrap().get(&order_id).cloned())
    }
}
