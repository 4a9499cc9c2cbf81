use crate::{
    entities::{order, order_item},
    entities::order::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::orders::OrderStatusUpdate,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const ADMIN_API_KEY_HEADER: &str = "x-admin-api-key";

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetailResponse {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderRequest {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub tracking_number: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateOrderResponse {
    pub success: bool,
    pub order: order::Model,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TrackOrderRequest {
    #[validate(length(min = 1, message = "Order number is required"))]
    pub order_number: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
}

/// GET /api/v1/orders/{id}
///
/// Order with its line-item snapshots, as rendered on the confirmation page.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = OrderDetailResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state
        .services
        .orders
        .get_order_with_items(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(OrderDetailResponse { order, items }))
}

/// POST /api/v1/track
///
/// Self-service tracking: order number plus the email the order was placed
/// under. Responds 404 whether the number is unknown or the email does not
/// match, so the endpoint cannot be used to probe for either.
#[utoipa::path(
    post,
    path = "/api/v1/track",
    request_body = TrackOrderRequest,
    responses(
        (status = 200, description = "Order found", body = OrderDetailResponse),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "No matching order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn track_order(
    State(state): State<AppState>,
    Json(payload): Json<TrackOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let (order, items) = state
        .services
        .orders
        .track_order(&payload.order_number, &payload.email)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(
                "Order not found. Please check your order number and email.".to_string(),
            )
        })?;
    Ok(Json(OrderDetailResponse { order, items }))
}

/// PATCH /api/v1/admin/orders/{id}
///
/// Back-office status update. Lifecycle timestamps are one-shot; re-applying
/// a status never moves them.
#[utoipa::path(
    patch,
    path = "/api/v1/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderRequest,
    responses(
        (status = 200, description = "Order updated", body = UpdateOrderResponse),
        (status = 401, description = "Missing or invalid admin key", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    require_admin(&state, &headers)?;

    let order = state
        .services
        .orders
        .update_order_status(
            id,
            OrderStatusUpdate {
                status: payload.status,
                payment_status: payload.payment_status,
                tracking_number: payload.tracking_number,
            },
        )
        .await?;

    Ok(Json(UpdateOrderResponse {
        success: true,
        order,
    }))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ServiceError> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Err(ServiceError::Unauthorized(
            "Admin API is not enabled".to_string(),
        ));
    };
    let provided = headers
        .get(ADMIN_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        return Err(ServiceError::Unauthorized(
            "Invalid admin API key".to_string(),
        ));
    }
    Ok(())
}
