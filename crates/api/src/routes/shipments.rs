//! Shipment operational endpoints (dispatch and delivery marking).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::Shipment;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::parse_id;

#[derive(Serialize)]
pub struct ShipmentResponse {
    pub id: String,
    pub order_id: String,
    pub status: String,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub failure_reason: Option<String>,
}

impl From<&Shipment> for ShipmentResponse {
    fn from(shipment: &Shipment) -> Self {
        Self {
            id: shipment.id().to_string(),
            order_id: shipment.order_id().to_string(),
            status: shipment.status().to_string(),
            carrier: shipment.carrier().map(String::from),
            tracking_number: shipment.tracking_number().map(String::from),
            failure_reason: shipment.failure_reason().map(String::from),
        }
    }
}

/// GET /orders/{id}/shipment — fetch the shipment for an order.
#[tracing::instrument(skip(state))]
pub async fn for_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ShipmentResponse>, ApiError> {
    let order_id = parse_id(&id, "order id")?;
    let shipment = state
        .platform
        .delivery
        .get_shipment_for_order(order_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No shipment for order: {order_id}")))?;

    Ok(Json(ShipmentResponse::from(&shipment)))
}

/// POST /shipments/{id}/dispatch — mark a shipment dispatched.
#[tracing::instrument(skip(state))]
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ShipmentResponse>, ApiError> {
    let shipment_id = parse_id(&id, "shipment id")?;
    state.platform.delivery.mark_dispatched(shipment_id).await?;

    let shipment = state
        .platform
        .delivery
        .get_shipment(shipment_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Shipment not found: {shipment_id}")))?;

    Ok(Json(ShipmentResponse::from(&shipment)))
}

/// POST /shipments/{id}/deliver — mark a shipment delivered.
#[tracing::instrument(skip(state))]
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ShipmentResponse>, ApiError> {
    let shipment_id = parse_id(&id, "shipment id")?;
    state.platform.delivery.mark_delivered(shipment_id).await?;

    let shipment = state
        .platform
        .delivery
        .get_shipment(shipment_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Shipment not found: {shipment_id}")))?;

    Ok(Json(ShipmentResponse::from(&shipment)))
}
