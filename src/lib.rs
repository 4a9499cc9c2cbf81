//! Storefront API Library
//!
//! Core of a direct-to-consumer storefront backend: checkout orchestration,
//! atomic stock reservation, and reconciliation of the payment provider's
//! webhook stream against order state.
#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
// MigrationTrait's late-bound `&SchemaManager` signature cannot spell the
// elided lifetime without tripping E0195.
#[allow(elided_lifetimes_in_paths)]
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;

use axum::{
    routing::{get, patch, post},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Builds the application router with all routes and middleware layers.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_spec))
        .route("/api/v1/checkout", post(handlers::checkout::create_checkout))
        .route("/api/v1/orders", post(handlers::checkout::create_cod_order))
        .route("/api/v1/orders/:id", get(handlers::orders::get_order))
        .route("/api/v1/track", post(handlers::orders::track_order))
        .route(
            "/api/v1/admin/orders/:id",
            patch(handlers::orders::update_order),
        )
        .route(
            "/api/v1/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi as _;
    Json(openapi::ApiDoc::openapi())
}
