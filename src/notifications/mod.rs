use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Snapshot of everything the order-confirmation email needs. Built from the
/// order row and its item snapshots, never from live catalog state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub order_date: DateTime<Utc>,
    pub items: Vec<ConfirmationItem>,
    pub subtotal: i64,
    pub shipping: i64,
    pub tax: i64,
    pub total: i64,
    pub currency: String,
    pub shipping_address: ConfirmationAddress,
}

impl OrderConfirmation {
    /// Builds the email payload from the order row and its item snapshots.
    pub fn from_order(
        order: &crate::entities::order::Model,
        items: &[crate::entities::order_item::Model],
    ) -> Self {
        Self {
            order_number: order.order_number.clone(),
            customer_name: order.customer_name.clone(),
            customer_email: order.customer_email.clone(),
            order_date: order.created_at,
            items: items
                .iter()
                .map(|item| ConfirmationItem {
                    name: item.product_name.clone(),
                    quantity: item.quantity,
                    price: item.price,
                    image: item.product_image.clone(),
                })
                .collect(),
            subtotal: order.subtotal,
            shipping: order.shipping_cost,
            tax: order.tax,
            total: order.total,
            currency: order.currency.clone(),
            shipping_address: ConfirmationAddress {
                full_name: order.customer_name.clone(),
                address_line1: order.shipping_address_line1.clone(),
                address_line2: order.shipping_address_line2.clone(),
                city: order.shipping_city.clone(),
                state: order.shipping_state.clone(),
                postal_code: order.shipping_postal_code.clone(),
                country: order.shipping_country.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationItem {
    pub name: String,
    pub quantity: i32,
    pub price: i64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationAddress {
    pub full_name: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Email API rejected the request: {0}")]
    Rejected(String),
}

/// Outbound customer notifications. Every send is best-effort; callers must
/// treat failures as log-and-continue.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError>;
}

/// Posts transactional email through an HTTP email-delivery API.
pub struct EmailNotifier {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailNotifier {
    pub fn new(api_url: String, api_key: String, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        let body = serde_json::json!({
            "from": self.from,
            "to": confirmation.customer_email,
            "subject": format!("Order confirmed: {}", confirmation.order_number),
            "template": "order-confirmation",
            "data": confirmation,
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected(format!("{}: {}", status, text)));
        }

        info!(
            order_number = %confirmation.order_number,
            "Order confirmation email sent"
        );
        Ok(())
    }
}

/// Fallback notifier used when no email API is configured; records the send
/// in the log and nothing else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        info!(
            order_number = %confirmation.order_number,
            customer_email = %confirmation.customer_email,
            "Order confirmation (log only, no email API configured)"
        );
        Ok(())
    }
}

/// Dispatches a confirmation on a detached task so the HTTP response never
/// waits on (or fails because of) email delivery.
pub fn dispatch_order_confirmation(notifier: Arc<dyn Notifier>, confirmation: OrderConfirmation) {
    tokio::spawn(async move {
        let order_number = confirmation.order_number.clone();
        if let Err(e) = notifier.send_order_confirmation(confirmation).await {
            error!(%order_number, "Failed to send order confirmation: {}", e);
        }
    });
}
