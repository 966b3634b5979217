//! Inventory service: owns stock positions and answers reservations.
//!
//! Reservation is all-or-nothing: either every line item of an order is
//! decremented and `InventoryReserved` is enqueued, or nothing is touched
//! and `InventoryReservationFailed` is enqueued. The transaction scope
//! makes the batch atomic; the pre-check makes the failure branch a clean
//! no-mutation commit.

use std::collections::HashMap;

use async_trait::async_trait;
use common::AggregateId;
use domain::{IntegrationEvent, InventoryItem, Money, ProductId};
use messaging::{EventConsumer, EventEnvelope, HandlerError, InMemoryStore, TransactionScope};

use crate::error::{Result, SagaError};

/// Local state owned by the inventory service.
#[derive(Debug, Clone, Default)]
pub struct InventoryServiceState {
    items: HashMap<ProductId, InventoryItem>,
}

/// The inventory service.
pub struct InventoryService {
    store: InMemoryStore<InventoryServiceState>,
}

impl InventoryService {
    /// Event types this service reacts to.
    pub const SUBSCRIPTIONS: &'static [&'static str] =
        &["OrderPlaced", "InventoryReleaseRequested"];

    /// Creates the service with an empty store.
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(InventoryServiceState::default()),
        }
    }

    /// Returns the service's local store.
    pub fn store(&self) -> &InMemoryStore<InventoryServiceState> {
        &self.store
    }

    /// Sets the stock position for a product, replacing any existing one.
    #[tracing::instrument(skip(self))]
    pub async fn set_stock(&self, product_id: impl Into<ProductId> + std::fmt::Debug, on_hand: u32) -> Result<()> {
        let product_id = product_id.into();
        self.store
            .transact(move |tx| {
                tx.state_mut()
                    .items
                    .insert(product_id.clone(), InventoryItem::new(product_id, on_hand));
                Ok::<_, SagaError>(())
            })
            .await
    }

    /// Returns the on-hand quantity for a product.
    pub async fn stock_on_hand(&self, product_id: &ProductId) -> Option<u32> {
        self.store
            .read(|s| s.items.get(product_id).map(|item| item.on_hand()))
            .await
    }
}

impl Default for InventoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventConsumer<InventoryServiceState> for InventoryService {
    fn name(&self) -> &'static str {
        "inventory-service"
    }

    async fn handle(
        &self,
        envelope: &EventEnvelope,
        tx: &mut TransactionScope<InventoryServiceState>,
    ) -> std::result::Result<(), HandlerError> {
        let event = IntegrationEvent::from_envelope(envelope)
            .map_err(|e| HandlerError::Fatal(format!("undecodable payload: {e}")))?;

        match event {
            IntegrationEvent::OrderPlaced(data) => {
                let outcome = reserve_all_or_nothing(tx, data.order_id, &data.items)?;
                tx.enqueue(
                    outcome
                        .into_envelope(envelope.correlation_id, Some(envelope.message_id))
                        .map_err(|e| HandlerError::Fatal(e.to_string()))?,
                );
            }
            IntegrationEvent::InventoryReleaseRequested(data) => {
                for item in &data.items {
                    let Some(stock) = tx.state_mut().items.get_mut(&item.product_id) else {
                        return Err(HandlerError::Fatal(format!(
                            "unknown product {}",
                            item.product_id
                        )));
                    };
                    stock
                        .increase(item.quantity)
                        .map_err(|e| HandlerError::Fatal(e.to_string()))?;
                }
                metrics::counter!("inventory_releases").increment(1);
                tracing::info!(
                    order_id = %data.order_id,
                    items = data.items.len(),
                    "reservation released"
                );
            }
            other => {
                tracing::warn!(
                    event_type = other.event_type(),
                    "unexpected event type for inventory service"
                );
            }
        }

        Ok(())
    }
}

/// Attempts to reserve every line item; decrements only if all fit.
fn reserve_all_or_nothing(
    tx: &mut TransactionScope<InventoryServiceState>,
    order_id: AggregateId,
    items: &[domain::EventLineItem],
) -> std::result::Result<IntegrationEvent, HandlerError> {
    let state = tx.state_mut();

    let mut shortfall: Option<String> = None;
    for item in items {
        match state.items.get(&item.product_id) {
            Some(stock) if stock.on_hand() >= item.quantity => {}
            Some(stock) => {
                shortfall = Some(format!(
                    "insufficient stock for {}: requested {}, on hand {}",
                    item.product_id,
                    item.quantity,
                    stock.on_hand()
                ));
                break;
            }
            None => {
                shortfall = Some(format!("unknown product {}", item.product_id));
                break;
            }
        }
    }

    if let Some(reason) = shortfall {
        metrics::counter!("inventory_reservations_failed").increment(1);
        tracing::info!(%order_id, %reason, "reservation refused");
        return Ok(IntegrationEvent::inventory_reservation_failed(
            order_id, reason,
        ));
    }

    for item in items {
        let Some(stock) = state.items.get_mut(&item.product_id) else {
            return Err(HandlerError::Fatal(format!(
                "unknown product {}",
                item.product_id
            )));
        };
        stock
            .decrease(item.quantity)
            .map_err(|e| HandlerError::Fatal(e.to_string()))?;
    }

    let total = items.iter().fold(Money::zero(), |acc, item| {
        acc + item.unit_price.multiply(item.quantity)
    });

    metrics::counter!("inventory_reservations").increment(1);
    tracing::info!(%order_id, total = %total, "reservation committed");
    Ok(IntegrationEvent::inventory_reserved(order_id, total))
}
