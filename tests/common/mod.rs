use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response},
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    entities::product,
    events,
    handlers::AppServices,
    migrator::Migrator,
    notifications::{Notifier, NotificationError, OrderConfirmation},
    services::payments::{
        sign_payload, CheckoutSessionRef, CheckoutSessionRequest, PaymentGateway,
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ADMIN_API_KEY: &str = "admin-test-key";

/// Gateway double that records every session request and returns canned
/// session references.
#[derive(Default)]
pub struct MockGateway {
    pub requests: Mutex<Vec<CheckoutSessionRequest>>,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSessionRef, storefront_api::errors::ServiceError> {
        let id = format!("cs_test_{}", Uuid::new_v4().simple());
        self.requests.lock().unwrap().push(request);
        Ok(CheckoutSessionRef {
            url: format!("https://checkout.test/pay/{}", id),
            id,
        })
    }
}

/// Notifier double counting confirmation sends.
#[derive(Default)]
pub struct CountingNotifier {
    pub sent: AtomicUsize,
    pub last: Mutex<Option<OrderConfirmation>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), NotificationError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(confirmation);
        Ok(())
    }
}

/// Application harness on a single-connection in-memory SQLite database.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<CountingNotifier>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(Some(WEBHOOK_SECRET.to_string())).await
    }

    /// An app with no webhook secret configured, for exercising the
    /// reject-unverifiable-webhooks path.
    pub async fn new_without_webhook_secret() -> Self {
        Self::build(None).await
    }

    async fn build(webhook_secret: Option<String>) -> Self {
        // A single pooled connection keeps the in-memory database shared and
        // serializes transactions the way a real backend's row locks would.
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.expect("sqlite connect");
        Migrator::up(&db, None).await.expect("migrations");
        let db = Arc::new(db);

        let mut cfg = AppConfig::for_database("sqlite::memory:");
        cfg.stripe_webhook_secret = webhook_secret;
        cfg.admin_api_key = Some(ADMIN_API_KEY.to_string());

        let (event_sender, mut event_rx) = events::channel(64);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let gateway = Arc::new(MockGateway::default());
        let notifier = Arc::new(CountingNotifier::default());

        let services = AppServices::new(
            db.clone(),
            &cfg,
            event_sender.clone(),
            Some(gateway.clone()),
            notifier.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: storefront_api::app_router(state.clone()),
            state,
            gateway,
            notifier,
        }
    }

    pub async fn seed_product(&self, name: &str, price: i64, stock: i32) -> product::Model {
        self.seed_product_with(name, price, stock, true).await
    }

    pub async fn seed_product_with(
        &self,
        name: &str,
        price: i64,
        stock: i32,
        is_active: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(format!(
                "{}-{}",
                name.to_lowercase().replace(' ', "-"),
                Uuid::new_v4().simple()
            )),
            image_url: Set(Some("https://cdn.test/p.jpg".to_string())),
            price: Set(price),
            stock: Set(stock),
            is_active: Set(is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn product_stock(&self, id: Uuid) -> i32 {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response")
    }

    /// Posts a correctly signed webhook payload.
    pub async fn post_webhook(&self, payload: &Value) -> Response<Body> {
        let body = payload.to_string();
        let ts = Utc::now().timestamp().to_string();
        let signature = format!(
            "t={},v1={}",
            ts,
            sign_payload(WEBHOOK_SECRET, &ts, body.as_bytes())
        );
        self.post_webhook_raw(body, &signature).await
    }

    pub async fn post_webhook_raw(&self, body: String, signature: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json")
            .header("stripe-signature", signature)
            .body(Body::from(body))
            .expect("request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("response")
    }

    /// Lets detached notification tasks run before asserting on them.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// A cart payload matching the checkout request shape.
pub fn cart_payload(product: &product::Model, quantity: i32, payment_method: &str) -> Value {
    json!({
        "items": [{
            "product_id": product.id,
            "name": product.name,
            "slug": product.slug,
            "image": product.image_url,
            "price": product.price,
            "quantity": quantity,
        }],
        "shipping_address": shipping_address(),
        "payment_method": payment_method,
    })
}

pub fn shipping_address() -> Value {
    json!({
        "full_name": "Asha Rao",
        "email": "asha@example.com",
        "phone": "+911234567890",
        "address_line1": "12 Lake Road",
        "city": "Pune",
        "state": "MH",
        "postal_code": "411001",
        "country": "IN",
    })
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// A `checkout.session.completed` event payload for the given order.
pub fn session_completed_event(event_id: &str, order_id: Uuid, payment_intent: &str) -> Value {
    json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "payment_intent": payment_intent,
            "metadata": { "orderId": order_id.to_string() }
        }}
    })
}

/// A `payment_intent.payment_failed` event payload for the given order.
pub fn payment_failed_event(event_id: &str, order_id: Uuid) -> Value {
    json!({
        "id": event_id,
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": format!("pi_{}", Uuid::new_v4().simple()),
            "metadata": { "orderId": order_id.to_string() }
        }}
    })
}
