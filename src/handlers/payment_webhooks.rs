use crate::{errors::ServiceError, services::payments::parse_gateway_event, AppState};
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use bytes::Bytes;
use serde_json::{json, Value};
use tracing::warn;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// POST /api/v1/payments/webhook
///
/// Entry point for the payment provider's event stream. The raw body is
/// verified against the signature header before any field is trusted;
/// dispatch is idempotent, so the provider may redeliver freely.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Missing signature or invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    // No secret means no way to authenticate the caller; anyone reaching
    // this route could otherwise flip orders to PAID or FAILED.
    let Some(verifier) = &state.services.webhook_verifier else {
        warn!("Webhook secret not configured; rejecting event");
        return Err(ServiceError::Unauthorized(
            "Webhook verification is not configured".to_string(),
        ));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::BadRequest("Missing stripe-signature header".to_string()))?;
    verifier.verify(&body, signature)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    let event = parse_gateway_event(&payload);
    state.services.reconciliation.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
