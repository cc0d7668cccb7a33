mod common;

use packhouse_api::entities::{MovementReason, OrderStatus};
use packhouse_api::errors::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn competing_reservations_never_oversell() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 5).await;

    let order_a = Uuid::new_v4();
    let order_b = Uuid::new_v4();

    let svc_a = app.services.inventory.clone();
    let svc_b = app.services.inventory.clone();
    let task_a = tokio::spawn(async move { svc_a.reserve(store, widget, 4, order_a).await });
    let task_b = tokio::spawn(async move { svc_b.reserve(store, widget, 3, order_b).await });

    let results = [task_a.await.unwrap(), task_b.await.unwrap()];
    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one reservation may win");

    // The loser failed fast with a retryable conflict, or arrived after the
    // winner committed and saw the shortage
    let loser = results.iter().find(|r| r.is_err()).unwrap();
    match loser.as_ref().unwrap_err() {
        ServiceError::Conflict(_) => {}
        ServiceError::InsufficientStock { available, .. } => {
            assert!(*available < 3.min(4));
        }
        other => panic!("unexpected loser error: {:?}", other),
    }

    let product = app.services.inventory.get_product(widget).await.unwrap();
    assert!(product.stock_on_hand == 1 || product.stock_on_hand == 2);
    app.services.inventory.audit_product(widget).await.unwrap();
}

#[tokio::test]
async fn reservation_fails_fast_while_product_is_locked() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 10).await;

    let _guard = app
        .services
        .inventory
        .locks()
        .try_acquire(widget)
        .expect("lock free");

    let err = app
        .services
        .inventory
        .reserve(store, widget, 1, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert!(err.is_retryable());

    // Nothing was taken from stock
    let product = app.services.inventory.get_product(widget).await.unwrap();
    assert_eq!(product.stock_on_hand, 10);
}

#[tokio::test]
async fn replaying_a_reservation_decrements_only_once() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 10).await;
    let order = Uuid::new_v4();

    let first = app
        .services
        .inventory
        .reserve(store, widget, 4, order)
        .await
        .unwrap();
    let replay = app
        .services
        .inventory
        .reserve(store, widget, 4, order)
        .await
        .unwrap();

    assert_eq!(first.id, replay.id);
    let product = app.services.inventory.get_product(widget).await.unwrap();
    assert_eq!(product.stock_on_hand, 6);

    let movements = app
        .services
        .inventory
        .movements_for_order(order)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity_delta, -4);
    assert_eq!(movements[0].stock_before, 10);
    assert_eq!(movements[0].stock_after, 6);
    assert_eq!(movements[0].reason, MovementReason::DecrementOnReady.as_str());
}

#[tokio::test]
async fn insufficient_stock_reports_the_shortfall() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 2).await;

    let err = app
        .services
        .inventory
        .reserve(store, widget, 5, Uuid::new_v4())
        .await
        .unwrap_err();
    match err {
        ServiceError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, widget);
            assert_eq!(requested, 5);
            assert_eq!(available, 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // A failed reservation leaves no ledger row behind
    assert!(app
        .services
        .inventory
        .movements_for_product(widget)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn order_completion_reserves_all_lines_or_none() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let plenty = common::seed_product(&app, store, "PLENTY", 100).await;
    let scarce = common::seed_product(&app, store, "SCARCE", 1).await;
    let order = common::seed_order(&app, store, &[(plenty, 2), (scarce, 3)]).await;

    let session = app
        .services
        .sessions
        .create_session(store, vec![order])
        .await
        .unwrap()
        .session;
    app.services
        .picking
        .report_picked(session.id, plenty, 2)
        .await
        .unwrap();
    app.services
        .picking
        .report_picked(session.id, scarce, 3)
        .await
        .unwrap();
    app.services.picking.finish_picking(session.id).await.unwrap();

    app.services
        .packing
        .report_packed(session.id, order, plenty)
        .await
        .unwrap();
    // The last line triggers completion, which fails on the scarce product
    let err = app
        .services
        .packing
        .report_packed(session.id, order, scarce)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock { .. }));

    // The whole reservation rolled back: no decrement survived, the order is
    // still in preparation
    let product = app.services.inventory.get_product(plenty).await.unwrap();
    assert_eq!(product.stock_on_hand, 100);
    assert!(app
        .services
        .inventory
        .movements_for_order(order)
        .await
        .unwrap()
        .is_empty());
    let detail = app.services.orders.get_order(order).await.unwrap();
    assert_eq!(detail.order.status(), Some(OrderStatus::InPreparation));

    // Packed flags survive the failure, so a later retry re-attempts the
    // completion without re-reporting every line
    let err = app
        .services
        .packing
        .report_packed(session.id, order, scarce)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock { .. }));
}
