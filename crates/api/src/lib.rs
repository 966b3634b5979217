//! HTTP API for the order fulfillment platform.
//!
//! Exposes the commands that enter the saga (place order, dispatch,
//! deliver, cancel, refund) plus read endpoints, health, and Prometheus
//! metrics. Everything downstream of a command runs through the
//! choreographed saga in the `saga` crate.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::Platform;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;

/// Shared application state accessible from all handlers.
///
/// Owns the running platform; dropping it stops nothing. Call
/// `Platform::shutdown` explicitly on exit.
pub struct AppState {
    pub platform: Platform,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/payment", get(routes::payments::for_order))
        .route("/orders/{id}/shipment", get(routes::shipments::for_order))
        .route("/payments/{id}/cancel", post(routes::payments::cancel))
        .route("/payments/{id}/refund", post(routes::payments::refund))
        .route("/shipments/{id}/dispatch", post(routes::shipments::dispatch))
        .route("/shipments/{id}/deliver", post(routes::shipments::deliver))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
