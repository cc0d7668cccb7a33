//! Packhouse API Library
//!
//! Fulfillment sessions, picking/packing progress tracking, and the
//! ledger-backed inventory engine behind them.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, response::Json, routing::get, Router};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrapper
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::products::create_product,
        handlers::products::list_products,
        handlers::products::get_product,
        handlers::products::get_movements,
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::delete_order,
        handlers::orders::get_order_movements,
        handlers::sessions::create_session,
        handlers::sessions::get_session,
        handlers::sessions::get_picking_list,
        handlers::sessions::report_picked,
        handlers::sessions::finish_picking,
        handlers::sessions::report_packed,
        handlers::sessions::complete_session,
        handlers::sessions::abandon_session,
    ),
    components(schemas(
        errors::ErrorResponse,
        services::inventory::CreateProductInput,
        services::orders::CreateOrderInput,
        services::orders::OrderLineInput,
        handlers::sessions::CreateSessionRequest,
        handlers::sessions::PickingProgressRequest,
        handlers::sessions::PackingProgressRequest,
    )),
    tags(
        (name = "products", description = "Catalog and inventory ledger"),
        (name = "orders", description = "Order intake and removal"),
        (name = "sessions", description = "Fulfillment session lifecycle")
    )
)]
pub struct ApiDoc;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        .nest("/products", handlers::products::products_router())
        .nest("/orders", handlers::orders::orders_router())
        .nest("/sessions", handlers::sessions::sessions_router())
}

/// The full application router with middleware applied.
pub fn app_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api-docs/openapi.json", get(openapi_spec))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "service": "packhouse-api",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(health_data)))
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
