//! Inventory item aggregate.
//!
//! No status field; safety is purely the non-negativity invariant on the
//! on-hand quantity, enforced by the guarded decrease.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_objects::ProductId;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Quantity must be greater than zero.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Not enough stock on hand; nothing was mutated.
    #[error("Insufficient stock for {product_id}: requested {requested}, on hand {on_hand}")]
    InsufficientStock {
        product_id: String,
        requested: u32,
        on_hand: u32,
    },
}

/// Stock position for one product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    id: AggregateId,
    product_id: ProductId,
    on_hand: u32,
    updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Creates a stock position with an initial on-hand quantity.
    pub fn new(product_id: impl Into<ProductId>, on_hand: u32) -> Self {
        Self {
            id: AggregateId::new(),
            product_id: product_id.into(),
            on_hand,
            updated_at: Utc::now(),
        }
    }

    /// Returns the aggregate ID.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Returns the product this position tracks.
    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Returns the quantity on hand.
    pub fn on_hand(&self) -> u32 {
        self.on_hand
    }

    /// Decreases on-hand stock for a reservation.
    ///
    /// Fails without mutating if the requested quantity is zero or exceeds
    /// what is on hand.
    pub fn decrease(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: self.product_id.to_string(),
                quantity,
            });
        }
        if quantity > self.on_hand {
            return Err(InventoryError::InsufficientStock {
                product_id: self.product_id.to_string(),
                requested: quantity,
                on_hand: self.on_hand,
            });
        }

        self.on_hand -= quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Increases on-hand stock (compensation or restock).
    ///
    /// Unconditional apart from the zero-quantity guard.
    pub fn increase(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity {
                product_id: self.product_id.to_string(),
                quantity,
            });
        }

        self.on_hand += quantity;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrease_within_stock() {
        let mut item = InventoryItem::new("SKU-001", 10);
        item.decrease(3).unwrap();
        assert_eq!(item.on_hand(), 7);
    }

    #[test]
    fn test_decrease_to_zero() {
        let mut item = InventoryItem::new("SKU-001", 5);
        item.decrease(5).unwrap();
        assert_eq!(item.on_hand(), 0);
    }

    #[test]
    fn test_decrease_beyond_stock_fails_without_mutation() {
        let mut item = InventoryItem::new("SKU-001", 5);
        let result = item.decrease(1000);

        assert!(matches!(
            result,
            Err(InventoryError::InsufficientStock {
                requested: 1000,
                on_hand: 5,
                ..
            })
        ));
        assert_eq!(item.on_hand(), 5);
    }

    #[test]
    fn test_decrease_zero_fails() {
        let mut item = InventoryItem::new("SKU-001", 5);
        let result = item.decrease(0);
        assert!(matches!(result, Err(InventoryError::InvalidQuantity { .. })));
        assert_eq!(item.on_hand(), 5);
    }

    #[test]
    fn test_increase() {
        let mut item = InventoryItem::new("SKU-001", 5);
        item.increase(3).unwrap();
        assert_eq!(item.on_hand(), 8);
    }

    #[test]
    fn test_increase_zero_fails() {
        let mut item = InventoryItem::new("SKU-001", 5);
        let result = item.increase(0);
        assert!(matches!(result, Err(InventoryError::InvalidQuantity { .. })));
    }

    #[test]
    fn test_release_restores_reservation() {
        let mut item = InventoryItem::new("SKU-001", 10);
        item.decrease(4).unwrap();
        item.increase(4).unwrap();
        assert_eq!(item.on_hand(), 10);
    }
}
