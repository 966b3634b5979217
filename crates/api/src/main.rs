//! API server entry point.
//!
//! Hosts all four services in one process over the in-memory broker, with
//! the in-memory payment gateway and carrier standing in for the real
//! integrations.

use std::sync::Arc;

use messaging::{InMemoryBroker, MessageBroker};
use saga::{InMemoryCarrierClient, InMemoryPaymentGateway, Platform};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Start the platform over the in-memory broker and mock gateways
    let config = api::Config::from_env();
    let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
    let gateway = Arc::new(InMemoryPaymentGateway::new());
    let carrier = Arc::new(InMemoryCarrierClient::new());

    let platform = Platform::start(broker, gateway, carrier, config.platform_config())
        .await
        .expect("failed to start platform");

    // 4. Seed demo stock so placed orders can reserve
    for (sku, on_hand) in [("SKU-001", 100), ("SKU-002", 50), ("SKU-003", 25)] {
        platform
            .inventory
            .set_stock(sku, on_hand)
            .await
            .expect("failed to seed stock");
        tracing::info!(sku, on_hand, "seeded demo stock");
    }

    // 5. Build and serve the application
    let state = Arc::new(api::AppState { platform });
    let app = api::create_app(Arc::clone(&state), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // The router is gone once serve returns; stop the background tasks.
    if let Ok(state) = Arc::try_unwrap(state) {
        state.platform.shutdown().await;
    }

    tracing::info!("server shut down gracefully");
}
