#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use uuid::Uuid;

use packhouse_api::config::AppConfig;
use packhouse_api::db::{self, DbConfig, DbPool};
use packhouse_api::events::{process_events, EventSender};
use packhouse_api::handlers::AppServices;
use packhouse_api::services::inventory::CreateProductInput;
use packhouse_api::services::orders::{CreateOrderInput, OrderLineInput};
use packhouse_api::{app_router, AppState};

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub services: AppServices,
}

/// Fresh in-memory database with migrations applied and the full service
/// graph wired up. A single pooled connection keeps every query on the same
/// in-memory SQLite instance.
pub async fn setup() -> TestApp {
    let cfg = DbConfig {
        url: "sqlite::memory:".into(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let pool = db::establish_connection_with_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");

    let db = Arc::new(pool);
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(process_events(rx));

    let services = AppServices::new(db.clone(), Some(Arc::new(EventSender::new(tx))));
    TestApp { db, services }
}

/// Full HTTP router over the test app's database and services, for driving
/// requests through the real routing and extraction layers.
pub fn router(app: &TestApp) -> Router {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(process_events(rx));

    let state = AppState {
        db: app.db.clone(),
        config: AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            0,
            "test".into(),
        ),
        event_sender: EventSender::new(tx),
        services: app.services.clone(),
    };
    app_router(state, Duration::from_secs(5))
}

pub async fn seed_product(app: &TestApp, store_id: Uuid, sku: &str, stock: i32) -> Uuid {
    app.services
        .inventory
        .create_product(CreateProductInput {
            store_id,
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            unit_price: dec!(9.99),
            initial_stock: stock,
        })
        .await
        .expect("seed product")
        .id
}

pub async fn seed_order(app: &TestApp, store_id: Uuid, lines: &[(Uuid, i32)]) -> Uuid {
    app.services
        .orders
        .create_order(CreateOrderInput {
            store_id,
            order_number: None,
            items: lines
                .iter()
                .map(|(product_id, quantity)| OrderLineInput {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .collect(),
        })
        .await
        .expect("seed order")
        .order
        .id
}

/// Drives a single-order session all the way to the order being
/// ready-to-ship: create, pick everything, finish picking, pack every line.
/// Returns the session id.
pub async fn make_order_ready(
    app: &TestApp,
    store_id: Uuid,
    order_id: Uuid,
    lines: &[(Uuid, i32)],
) -> Uuid {
    let detail = app
        .services
        .sessions
        .create_session(store_id, vec![order_id])
        .await
        .expect("create session");
    let session_id = detail.session.id;

    for (product_id, quantity) in lines {
        app.services
            .picking
            .report_picked(session_id, *product_id, *quantity)
            .await
            .expect("report picked");
    }
    app.services
        .picking
        .finish_picking(session_id)
        .await
        .expect("finish picking");

    for (product_id, _) in lines {
        app.services
            .packing
            .report_packed(session_id, order_id, *product_id)
            .await
            .expect("report packed");
    }
    session_id
}
