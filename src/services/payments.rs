use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::instrument;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Request for a hosted checkout session. The order id and number ride along
/// as opaque metadata so the webhook stream can be joined back to the order.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub line_items: Vec<SessionLineItem>,
}

#[derive(Debug, Clone)]
pub struct SessionLineItem {
    pub name: String,
    /// Unit amount in the smallest currency unit.
    pub price: i64,
    pub quantity: i32,
    pub image: Option<String>,
}

/// Reference to a created hosted-payment session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionRef {
    pub id: String,
    pub url: String,
}

/// Hosted-payment provider. Implemented against Stripe in production and a
/// recording mock in tests.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSessionRef, ServiceError>;
}

/// Stripe Checkout implementation over the form-encoded REST API.
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Self {
        Self::with_api_base(secret_key, STRIPE_API_BASE.to_string())
    }

    pub fn with_api_base(secret_key: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            api_base,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSessionRef, ServiceError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("customer_email".into(), request.customer_email.clone()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("metadata[orderId]".into(), request.order_id.to_string()),
            (
                "metadata[orderNumber]".into(),
                request.order_number.clone(),
            ),
            (
                "payment_intent_data[metadata][orderId]".into(),
                request.order_id.to_string(),
            ),
            (
                "payment_intent_data[metadata][orderNumber]".into(),
                request.order_number.clone(),
            ),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                request.currency.to_lowercase(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.price.to_string(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            if let Some(image) = &item.image {
                params.push((
                    format!("line_items[{i}][price_data][product_data][images][0]"),
                    image.clone(),
                ));
            }
            params.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await
            .map_err(|e| ServiceError::PaymentGatewayError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::PaymentGatewayError(format!(
                "checkout session create failed: {}: {}",
                status, text
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentGatewayError(e.to_string()))?;

        let id = json
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::PaymentGatewayError("session response missing id".to_string())
            })?
            .to_string();
        let url = json
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ServiceError::PaymentGatewayError("session response missing url".to_string())
            })?
            .to_string();

        Ok(CheckoutSessionRef { id, url })
    }
}

/// Verifies Stripe-style webhook signatures: HMAC-SHA256 over
/// `"{timestamp}.{raw_body}"` with the shared endpoint secret, carried in a
/// `Stripe-Signature: t=...,v1=...` header.
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: String, tolerance_secs: u64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Rejects unverifiable requests before any payload field is trusted.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), ServiceError> {
        let mut timestamp = "";
        let mut v1 = "";
        for part in signature_header.split(',') {
            let mut it = part.trim().splitn(2, '=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => timestamp = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }

        if timestamp.is_empty() || v1.is_empty() {
            return Err(ServiceError::Unauthorized(
                "malformed webhook signature header".to_string(),
            ));
        }

        let ts: i64 = timestamp.parse().map_err(|_| {
            ServiceError::Unauthorized("malformed webhook signature timestamp".to_string())
        })?;
        let now = Utc::now().timestamp();
        if (now - ts).unsigned_abs() > self.tolerance_secs {
            return Err(ServiceError::Unauthorized(
                "webhook signature timestamp outside tolerance".to_string(),
            ));
        }

        let expected = sign_payload(&self.secret, timestamp, payload);
        if !constant_time_eq(&expected, v1) {
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
        Ok(())
    }
}

/// Computes the hex signature for a timestamped payload. Shared by the
/// verifier and by test harnesses that need to produce valid headers.
pub fn sign_payload(secret: &str, timestamp: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// A provider event reduced to what reconciliation needs.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    /// Provider event id, used for the idempotency ledger.
    pub id: Option<String>,
    pub event_type: String,
    pub kind: GatewayEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventKind {
    /// Hosted checkout completed or the underlying payment succeeded.
    PaymentSucceeded {
        order_id: Option<Uuid>,
        payment_intent_id: Option<String>,
    },
    PaymentFailed {
        order_id: Option<Uuid>,
    },
    /// Anything we do not handle. Acknowledged, never an error, so the
    /// provider does not retry forever.
    Unrecognized,
}

/// Extracts the reconciliation-relevant fields from a raw provider payload.
pub fn parse_gateway_event(json: &Value) -> GatewayEvent {
    let id = json.get("id").and_then(Value::as_str).map(str::to_string);
    let event_type = json
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let object = &json["data"]["object"];
    let order_id = object["metadata"]["orderId"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok());

    let kind = match event_type.as_str() {
        "checkout.session.completed" => GatewayEventKind::PaymentSucceeded {
            order_id,
            payment_intent_id: object["payment_intent"].as_str().map(str::to_string),
        },
        "payment_intent.succeeded" => GatewayEventKind::PaymentSucceeded {
            order_id,
            payment_intent_id: object["id"].as_str().map(str::to_string),
        },
        "payment_intent.payment_failed" => GatewayEventKind::PaymentFailed { order_id },
        _ => GatewayEventKind::Unrecognized,
    };

    GatewayEvent {
        id,
        event_type,
        kind,
    }
}
