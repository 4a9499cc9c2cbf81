use crate::{
    entities::order::PaymentMethod,
    errors::ServiceError,
    services::checkout::CheckoutRequest,
    AppState,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub session_url: String,
    pub order_id: Uuid,
    pub order_number: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order_id: Uuid,
    pub order_number: String,
    pub message: String,
}

/// POST /api/v1/checkout
///
/// Creates a hosted payment session for online methods (card, upi,
/// netbanking). The order is created first with stock reserved, so a
/// concurrent checkout cannot oversell while this one is mid-payment.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutSessionResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Inventory conflict", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    if payload.payment_method == PaymentMethod::Cod {
        return Err(ServiceError::BadRequest(
            "COD orders should use the /api/v1/orders endpoint".to_string(),
        ));
    }

    let checkout = state.services.checkout.create_online_checkout(payload).await?;
    Ok(Json(CheckoutSessionResponse {
        session_id: checkout.session_id,
        session_url: checkout.session_url,
        order_id: checkout.order_id,
        order_number: checkout.order_number,
    }))
}

/// POST /api/v1/orders
///
/// Direct order creation for cash on delivery. Payment stays PENDING until
/// settled physically at delivery; the confirmation email goes out
/// immediately, best-effort.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = CreateOrderResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Inventory conflict", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_cod_order(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.checkout.place_cod_order(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            success: true,
            order_id: order.id,
            order_number: order.order_number,
            message: "Order created successfully".to_string(),
        }),
    ))
}
