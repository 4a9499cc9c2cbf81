//! End-to-end tests for the checkout orchestration: validation, atomic stock
//! reservation, server-side totals, and the COD/online split.

mod common;

use axum::http::Method;
use common::{cart_payload, response_json, shipping_address, TestApp};
use futures::future::join_all;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use std::sync::atomic::Ordering;
use storefront_api::entities::Order;
use uuid::Uuid;

#[tokio::test]
async fn cod_checkout_creates_order_and_reserves_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 2, "cod")),
        )
        .await;
    assert_eq!(response.status(), 201);

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    let order_id: Uuid = body["order_id"].as_str().unwrap().parse().unwrap();

    let detail = response_json(
        app.request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    let order = &detail["order"];

    // Server recomputes every figure from authoritative prices.
    assert_eq!(order["subtotal"], 4998);
    assert_eq!(order["shipping_cost"], 9900);
    assert_eq!(order["tax"], 4998 * 1800 / 10_000);
    assert_eq!(
        order["total"].as_i64().unwrap(),
        order["subtotal"].as_i64().unwrap()
            + order["shipping_cost"].as_i64().unwrap()
            + order["tax"].as_i64().unwrap()
    );
    assert_eq!(order["payment_status"], "PENDING");
    assert_eq!(order["status"], "PENDING");
    assert_eq!(detail["items"].as_array().unwrap().len(), 1);
    assert_eq!(detail["items"][0]["quantity"], 2);
    assert_eq!(detail["items"][0]["price"], 2499);

    // Stock reserved at creation time.
    assert_eq!(app.product_stock(product.id).await, 3);

    // COD confirmation goes out right away, best-effort.
    app.settle().await;
    assert_eq!(app.notifier.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn insufficient_stock_rejects_the_whole_order() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 1).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 2, "cod")),
        )
        .await;
    assert_eq!(response.status(), 422);

    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Insufficient stock for Brass Diya"));

    // No order row, no stock mutation.
    assert_eq!(app.product_stock(product.id).await, 1);
    let orders = Order::find().count(&*app.state.db).await.unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn stale_price_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;

    let mut payload = cart_payload(&product, 1, "cod");
    payload["items"][0]["price"] = json!(1999);

    let response = app.request(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(response.status(), 422);
    let body = response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Price has changed"));
    assert_eq!(app.product_stock(product.id).await, 5);
}

#[tokio::test]
async fn inactive_product_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product_with("Retired Lamp", 2499, 5, false).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 1, "cod")),
        )
        .await;
    assert_eq!(response.status(), 422);
    let body = response_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("no longer available"));
}

#[tokio::test]
async fn empty_cart_is_rejected_before_any_transaction() {
    let app = TestApp::new().await;

    let payload = json!({
        "items": [],
        "shipping_address": shipping_address(),
        "payment_method": "cod",
    });
    let response = app.request(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(response.status(), 400);
    let body = response_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("Cart is empty"));
}

#[tokio::test]
async fn invalid_email_is_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;

    let mut payload = cart_payload(&product, 1, "cod");
    payload["shipping_address"]["email"] = json!("not-an-email");

    let response = app.request(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn multi_line_cart_fails_atomically() {
    let app = TestApp::new().await;
    let plenty = app.seed_product("Cushion Cover", 1299, 10).await;
    let scarce = app.seed_product("Silk Stole", 4999, 1).await;

    let payload = json!({
        "items": [
            {
                "product_id": plenty.id, "name": plenty.name, "slug": plenty.slug,
                "image": plenty.image_url, "price": plenty.price, "quantity": 2,
            },
            {
                "product_id": scarce.id, "name": scarce.name, "slug": scarce.slug,
                "image": scarce.image_url, "price": scarce.price, "quantity": 3,
            },
        ],
        "shipping_address": shipping_address(),
        "payment_method": "cod",
    });

    let response = app.request(Method::POST, "/api/v1/orders", Some(payload)).await;
    assert_eq!(response.status(), 422);

    // Neither line's stock moved.
    assert_eq!(app.product_stock(plenty.id).await, 10);
    assert_eq!(app.product_stock(scarce.id).await, 1);
}

#[tokio::test]
async fn online_checkout_creates_gateway_session() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(&product, 1, "card")),
        )
        .await;
    assert_eq!(response.status(), 200);

    let body = response_json(response).await;
    let order_id: Uuid = body["order_id"].as_str().unwrap().parse().unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(body["session_url"].as_str().unwrap().starts_with("https://"));

    // Session id persisted on the order for webhook correlation.
    let detail = response_json(
        app.request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(detail["order"]["stripe_session_id"], json!(session_id));
    assert_eq!(detail["order"]["payment_status"], "PENDING");

    // Stock is reserved during the payment window.
    assert_eq!(app.product_stock(product.id).await, 4);

    // Metadata carries the correlation ids.
    let requests = app.gateway.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].order_id, order_id);

    // No confirmation until the webhook confirms payment.
    drop(requests);
    app.settle().await;
    assert_eq!(app.notifier.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn checkout_endpoint_rejects_cod() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload(&product, 1, "cod")),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(app.product_stock(product.id).await, 5);
}

#[tokio::test]
async fn orders_endpoint_rejects_online_methods() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 1, "card")),
        )
        .await;
    assert_eq!(response.status(), 400);
    assert_eq!(app.product_stock(product.id).await, 5);
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let app = TestApp::new().await;
    let product = app.seed_product("Limited Print", 9999, 5).await;

    let attempts = (0..10).map(|_| {
        app.request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 1, "cod")),
        )
    });
    let responses = join_all(attempts).await;

    let successes = responses.iter().filter(|r| r.status() == 201).count();
    let rejected = responses.iter().filter(|r| r.status() == 422).count();

    assert_eq!(successes, 5, "exactly the available stock is sold");
    assert_eq!(rejected, 5);
    assert_eq!(app.product_stock(product.id).await, 0);
}
