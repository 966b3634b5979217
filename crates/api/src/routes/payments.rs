//! Payment operational endpoints (cancel and refund).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::Payment;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::orders::parse_id;

#[derive(Deserialize)]
pub struct CancelPaymentRequest {
    pub reason: String,
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
    pub attempts: Vec<PaymentAttemptResponse>,
}

#[derive(Serialize)]
pub struct PaymentAttemptResponse {
    pub operation: String,
    pub success: bool,
    pub detail: String,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id().to_string(),
            order_id: payment.order_id().to_string(),
            status: payment.status().to_string(),
            amount_cents: payment.amount().cents(),
            currency: payment.currency().to_string(),
            attempts: payment
                .attempts()
                .iter()
                .map(|attempt| PaymentAttemptResponse {
                    operation: attempt.operation.clone(),
                    success: attempt.success,
                    detail: attempt.detail.clone(),
                })
                .collect(),
        }
    }
}

/// GET /orders/{id}/payment — fetch the payment for an order.
#[tracing::instrument(skip(state))]
pub async fn for_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order_id = parse_id(&id, "order id")?;
    let payment = state
        .platform
        .payments
        .get_payment_for_order(order_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No payment for order: {order_id}")))?;

    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/{id}/cancel — cancel a pre-capture payment.
#[tracing::instrument(skip(state, req))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CancelPaymentRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_id(&id, "payment id")?;
    state
        .platform
        .payments
        .cancel_payment(payment_id, req.reason)
        .await?;

    let payment = state
        .platform
        .payments
        .get_payment(payment_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Payment not found: {payment_id}")))?;

    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/{id}/refund — refund a captured payment.
#[tracing::instrument(skip(state))]
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_id(&id, "payment id")?;
    state.platform.payments.refund_payment(payment_id).await?;

    let payment = state
        .platform
        .payments
        .get_payment(payment_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Payment not found: {payment_id}")))?;

    Ok(Json(PaymentResponse::from(&payment)))
}
