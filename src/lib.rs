//! Order Intake Library
//!
//! Restaurant order intake: customer identity resolution, the order ledger, the
//! status lifecycle and the daily counter dashboard, served over HTTP.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

/// Success envelope: `success`, the payload's own fields, then `meta`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            meta: ResponseMeta::capture(),
        }
    }
}


/// Order and dashboard routes.
///
/// `/orders/status/today` is a literal path and wins over `/orders/:order_number`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/status/today", get(handlers::orders::todays_orders))
        .route("/orders/:order_number", get(handlers::orders::get_order))
        .route(
            "/orders/:order_number/status",
            patch(handlers::orders::update_order_status),
        )
}

/// Every route the service exposes, with the request id layer applied.
///
/// Timeouts, CORS and compression are added by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .merge(api_routes())
        .nest("/health", health::health_routes())
        .route(openapi::OPENAPI_JSON_PATH, get(openapi::openapi_json))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}
