//! Order command and read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::AggregateId;
use domain::{Address, CustomerId, Money, Order, OrderItem};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: Option<String>,
    pub shipping_address: AddressRequest,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct AddressRequest {
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderPlacedResponse {
    pub order_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub failure_reason: Option<String>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            customer_id: order.customer_id().to_string(),
            status: order.status().to_string(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            total_cents: order.total_amount().cents(),
            failure_reason: order.failure_reason().map(String::from),
        }
    }
}

pub(crate) fn parse_id(id: &str, what: &str) -> Result<AggregateId, ApiError> {
    uuid::Uuid::parse_str(id)
        .map(AggregateId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}

// -- Handlers --

/// POST /orders — place a new order.
#[tracing::instrument(skip(state, req))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(axum::http::StatusCode, Json<OrderPlacedResponse>), ApiError> {
    let customer_id = match &req.customer_id {
        Some(id) => CustomerId::from_uuid(
            uuid::Uuid::parse_str(id)
                .map_err(|e| ApiError::BadRequest(format!("Invalid customer_id: {e}")))?,
        ),
        None => CustomerId::new(),
    };

    let address = Address::new(
        req.shipping_address.street,
        req.shipping_address.city,
        req.shipping_address.postal_code,
        req.shipping_address.country,
    );

    let items: Vec<OrderItem> = req
        .items
        .iter()
        .map(|item| {
            OrderItem::new(
                item.product_id.as_str(),
                item.quantity,
                Money::from_cents(item.unit_price_cents),
            )
        })
        .collect();

    let order_id = state
        .platform
        .orders
        .place_order(customer_id, address, items)
        .await?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(OrderPlacedResponse {
            order_id: order_id.to_string(),
            status: "Pending".to_string(),
        }),
    ))
}

/// GET /orders/{id} — fetch one order.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id, "order id")?;
    let order = state
        .platform
        .orders
        .get_order(order_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Order not found: {order_id}")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/{id}/cancel — cancel an order.
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id, "order id")?;
    state
        .platform
        .orders
        .cancel_order(order_id, req.reason)
        .await?;

    let order = state
        .platform
        .orders
        .get_order(order_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Order not found: {order_id}")))?;

    Ok(Json(OrderResponse::from(&order)))
}
