//! Platform wiring: builds the four services over one broker, subscribes
//! their consumer pools, and supervises one outbox relay per service.

use std::sync::Arc;

use messaging::{
    CircuitBreakerConfig, ConsumerConfig, ConsumerPool, MessageBroker, OutboxRelay, RelayConfig,
    RelayHandle, RetryPolicy,
};

use crate::error::Result;
use crate::gateways::{CarrierClient, OrderDetailsClient, PaymentGateway};
use crate::policy::GatewayPolicy;
use crate::services::{DeliveryService, InventoryService, OrderService, PaymentService};

/// Tunables for the whole platform.
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    /// Outbox relay settings, shared by every service's relay.
    pub relay: RelayConfig,
    /// Consumer pool settings, shared by every service's pool.
    pub consumer: ConsumerConfig,
    /// Retry schedule for gateway calls.
    pub gateway_retry: RetryPolicy,
    /// Breaker settings; each external dependency gets its own breaker.
    pub breaker: CircuitBreakerConfig,
}

/// The running platform: services, consumer pools, and relays.
///
/// In production each service runs in its own process with its own store
/// and relay; this wiring hosts all four in one process over a shared
/// broker, which is also the topology the integration tests exercise.
pub struct Platform {
    /// The order service.
    pub orders: Arc<OrderService>,
    /// The inventory service.
    pub inventory: Arc<InventoryService>,
    /// The payment service.
    pub payments: Arc<PaymentService>,
    /// The delivery service.
    pub delivery: Arc<DeliveryService>,
    pools: Vec<ConsumerPool>,
    relays: Vec<RelayHandle>,
}

impl Platform {
    /// Builds the services, subscribes every consumer, and starts the
    /// relays.
    pub async fn start(
        broker: Arc<dyn MessageBroker>,
        payment_gateway: Arc<dyn PaymentGateway>,
        carrier: Arc<dyn CarrierClient>,
        config: PlatformConfig,
    ) -> Result<Self> {
        let orders = Arc::new(OrderService::new());
        let inventory = Arc::new(InventoryService::new());
        let payments = Arc::new(PaymentService::new(
            payment_gateway,
            GatewayPolicy::new(config.gateway_retry.clone(), config.breaker.clone()),
        ));
        let delivery = Arc::new(DeliveryService::new(
            Arc::clone(&orders) as Arc<dyn OrderDetailsClient>,
            carrier,
            GatewayPolicy::new(config.gateway_retry.clone(), config.breaker.clone()),
        ));

        // Subscriptions must be in place before any relay publishes, or
        // early events would be lost on the in-memory broker.
        let mut pools = Vec::new();

        let mut pool = ConsumerPool::new(Arc::clone(&broker), config.consumer.clone());
        for subject in OrderService::SUBSCRIPTIONS {
            pool.subscribe(subject, orders.store().clone(), Arc::clone(&orders))
                .await?;
        }
        pools.push(pool);

        let mut pool = ConsumerPool::new(Arc::clone(&broker), config.consumer.clone());
        for subject in InventoryService::SUBSCRIPTIONS {
            pool.subscribe(subject, inventory.store().clone(), Arc::clone(&inventory))
                .await?;
        }
        pools.push(pool);

        let mut pool = ConsumerPool::new(Arc::clone(&broker), config.consumer.clone());
        for subject in PaymentService::SUBSCRIPTIONS {
            pool.subscribe(subject, payments.store().clone(), Arc::clone(&payments))
                .await?;
        }
        pools.push(pool);

        let mut pool = ConsumerPool::new(Arc::clone(&broker), config.consumer.clone());
        for subject in DeliveryService::SUBSCRIPTIONS {
            pool.subscribe(subject, delivery.store().clone(), Arc::clone(&delivery))
                .await?;
        }
        pools.push(pool);

        let relays = vec![
            OutboxRelay::new(
                "order",
                orders.store().clone(),
                Arc::clone(&broker),
                config.relay.clone(),
            )
            .spawn(),
            OutboxRelay::new(
                "inventory",
                inventory.store().clone(),
                Arc::clone(&broker),
                config.relay.clone(),
            )
            .spawn(),
            OutboxRelay::new(
                "payment",
                payments.store().clone(),
                Arc::clone(&broker),
                config.relay.clone(),
            )
            .spawn(),
            OutboxRelay::new(
                "delivery",
                delivery.store().clone(),
                Arc::clone(&broker),
                config.relay.clone(),
            )
            .spawn(),
        ];

        tracing::info!("platform started");

        Ok(Self {
            orders,
            inventory,
            payments,
            delivery,
            pools,
            relays,
        })
    }

    /// Stops consumer pools and relays.
    ///
    /// Any handler mid-message simply never commits; the message is
    /// redelivered after a restart.
    pub async fn shutdown(self) {
        for pool in self.pools {
            pool.shutdown().await;
        }
        for relay in self.relays {
            relay.stop().await;
        }
        tracing::info!("platform stopped");
    }
}
