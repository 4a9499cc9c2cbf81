//! Admin status updates and order retrieval.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, Response},
};
use common::{cart_payload, response_json, TestApp, ADMIN_API_KEY};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn admin_patch(app: &TestApp, order_id: Uuid, key: Option<&str>, body: Value) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::PATCH)
        .uri(format!("/api/v1/admin/orders/{}", order_id))
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("x-admin-api-key", key);
    }
    app.router
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).expect("request"))
        .await
        .expect("response")
}

async fn place_cod_order(app: &TestApp) -> Uuid {
    let product = app.seed_product("Brass Diya", 2499, 5).await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 1, "cod")),
        )
        .await;
    assert_eq!(response.status(), 201);
    response_json(response).await["order_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn unknown_order_is_404() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn admin_update_requires_the_configured_key() {
    let app = TestApp::new().await;
    let order_id = place_cod_order(&app).await;

    let missing = admin_patch(&app, order_id, None, json!({"status": "SHIPPED"})).await;
    assert_eq!(missing.status(), 401);

    let wrong = admin_patch(&app, order_id, Some("nope"), json!({"status": "SHIPPED"})).await;
    assert_eq!(wrong.status(), 401);
}

#[tokio::test]
async fn shipping_sets_the_timestamp_once() {
    let app = TestApp::new().await;
    let order_id = place_cod_order(&app).await;

    let first = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"status": "SHIPPED", "tracking_number": "TRK-001"}),
    )
    .await;
    assert_eq!(first.status(), 200);
    let order = response_json(first).await["order"].clone();
    assert_eq!(order["status"], "SHIPPED");
    assert_eq!(order["tracking_number"], json!("TRK-001"));
    let shipped_at = order["shipped_at"].clone();
    assert!(shipped_at.is_string());

    // Re-applying the same status must not rewrite the timestamp.
    let second = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"status": "SHIPPED"}),
    )
    .await;
    assert_eq!(second.status(), 200);
    let order = response_json(second).await["order"].clone();
    assert_eq!(order["shipped_at"], shipped_at);
}

#[tokio::test]
async fn delivery_and_cancellation_record_their_timestamps() {
    let app = TestApp::new().await;
    let order_id = place_cod_order(&app).await;

    let delivered = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"status": "DELIVERED"}),
    )
    .await;
    let order = response_json(delivered).await["order"].clone();
    assert!(order["delivered_at"].is_string());

    let cancelled_id = place_cod_order(&app).await;
    let cancelled = admin_patch(
        &app,
        cancelled_id,
        Some(ADMIN_API_KEY),
        json!({"status": "CANCELLED"}),
    )
    .await;
    let order = response_json(cancelled).await["order"].clone();
    assert!(order["cancelled_at"].is_string());
}

#[tokio::test]
async fn tracking_requires_the_matching_email() {
    let app = TestApp::new().await;
    let product = app.seed_product("Brass Diya", 2499, 5).await;
    let created = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(cart_payload(&product, 1, "cod")),
        )
        .await;
    assert_eq!(created.status(), 201);
    let order_number = response_json(created).await["order_number"]
        .as_str()
        .unwrap()
        .to_string();

    // Email matching is case-insensitive, like the checkout form.
    let found = app
        .request(
            Method::POST,
            "/api/v1/track",
            Some(json!({"order_number": order_number, "email": "Asha@Example.com"})),
        )
        .await;
    assert_eq!(found.status(), 200);
    let detail = response_json(found).await;
    assert_eq!(detail["order"]["order_number"], json!(order_number));
    assert_eq!(detail["items"].as_array().unwrap().len(), 1);

    // Wrong email and unknown number are indistinguishable.
    let wrong_email = app
        .request(
            Method::POST,
            "/api/v1/track",
            Some(json!({"order_number": order_number, "email": "other@example.com"})),
        )
        .await;
    assert_eq!(wrong_email.status(), 404);

    let unknown = app
        .request(
            Method::POST,
            "/api/v1/track",
            Some(json!({"order_number": "BAB-20240101-00000", "email": "asha@example.com"})),
        )
        .await;
    assert_eq!(unknown.status(), 404);
}

#[tokio::test]
async fn payment_status_cannot_move_backwards() {
    let app = TestApp::new().await;
    let order_id = place_cod_order(&app).await;

    let paid = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"payment_status": "PAID"}),
    )
    .await;
    assert_eq!(paid.status(), 200);

    // PAID is not revertible to PENDING or FAILED from the back office.
    for target in ["PENDING", "FAILED"] {
        let response = admin_patch(
            &app,
            order_id,
            Some(ADMIN_API_KEY),
            json!({"payment_status": target}),
        )
        .await;
        assert_eq!(response.status(), 400, "PAID -> {} must be rejected", target);
    }

    let detail = response_json(
        app.request(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(detail["order"]["payment_status"], "PAID");
}

#[tokio::test]
async fn refund_requires_a_paid_order() {
    let app = TestApp::new().await;
    let order_id = place_cod_order(&app).await;

    let response = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"payment_status": "REFUNDED"}),
    )
    .await;
    assert_eq!(response.status(), 400);

    let paid = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"payment_status": "PAID"}),
    )
    .await;
    assert_eq!(paid.status(), 200);

    let refunded = admin_patch(
        &app,
        order_id,
        Some(ADMIN_API_KEY),
        json!({"payment_status": "REFUNDED"}),
    )
    .await;
    assert_eq!(refunded.status(), 200);
    let order = response_json(refunded).await["order"].clone();
    assert_eq!(order["payment_status"], "REFUNDED");
}
