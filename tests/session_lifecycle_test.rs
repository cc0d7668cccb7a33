mod common;

use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use packhouse_api::entities::{fulfillment_session, MovementReason, OrderStatus, SessionStatus};
use packhouse_api::errors::ServiceError;

#[tokio::test]
async fn full_session_flow_decrements_stock_exactly_once_per_order() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 100).await;

    let mut orders = Vec::new();
    for _ in 0..3 {
        orders.push(common::seed_order(&app, store, &[(widget, 3)]).await);
    }

    let detail = app
        .services
        .sessions
        .create_session(store, orders.clone())
        .await
        .expect("create session");
    let session_id = detail.session.id;

    assert!(detail.session.code.starts_with("PREP-"));
    assert!(detail.session.code.ends_with("-001"));
    assert_eq!(detail.session.status, SessionStatus::Picking.as_str());

    // Three orders of 3 units each aggregate into one 9-unit picking line
    assert_eq!(detail.picking_items.len(), 1);
    assert_eq!(detail.picking_items[0].required_quantity, 9);
    assert_eq!(detail.picking_items[0].picked_quantity, 0);

    // Member orders were claimed into preparation
    for order_id in &orders {
        let order = app.services.orders.get_order(*order_id).await.unwrap();
        assert_eq!(order.order.status(), Some(OrderStatus::InPreparation));
    }

    // Finishing early reports the deficiency and leaves the session picking
    app.services
        .picking
        .report_picked(session_id, widget, 4)
        .await
        .unwrap();
    let err = app
        .services
        .picking
        .finish_picking(session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(ref msg) if msg.contains("4/9")));

    app.services
        .picking
        .report_picked(session_id, widget, 9)
        .await
        .unwrap();
    let session = app
        .services
        .picking
        .finish_picking(session_id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Packing.as_str());

    // Packing the single line of each order completes that order
    for order_id in &orders {
        let outcome = app
            .services
            .packing
            .report_packed(session_id, *order_id, widget)
            .await
            .unwrap();
        assert!(outcome.order_completed);
        let order = app.services.orders.get_order(*order_id).await.unwrap();
        assert_eq!(order.order.status(), Some(OrderStatus::ReadyToShip));
    }

    // 100 - 3x3, one decrement row per order
    let product = app.services.inventory.get_product(widget).await.unwrap();
    assert_eq!(product.stock_on_hand, 91);
    let movements = app
        .services
        .inventory
        .movements_for_product(widget)
        .await
        .unwrap();
    assert_eq!(movements.len(), 3);
    assert!(movements
        .iter()
        .all(|m| m.reason == MovementReason::DecrementOnReady.as_str() && m.quantity_delta == -3));
    app.services.inventory.audit_product(widget).await.unwrap();

    let session = app
        .services
        .sessions
        .complete_session(session_id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed.as_str());
}

#[tokio::test]
async fn session_codes_count_up_per_store_per_day() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let other_store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let gadget = common::seed_product(&app, other_store, "GADGET", 50).await;

    let order_a = common::seed_order(&app, store, &[(widget, 1)]).await;
    let order_b = common::seed_order(&app, store, &[(widget, 1)]).await;
    let order_c = common::seed_order(&app, other_store, &[(gadget, 1)]).await;

    let first = app
        .services
        .sessions
        .create_session(store, vec![order_a])
        .await
        .unwrap();
    let second = app
        .services
        .sessions
        .create_session(store, vec![order_b])
        .await
        .unwrap();
    let elsewhere = app
        .services
        .sessions
        .create_session(other_store, vec![order_c])
        .await
        .unwrap();

    assert!(first.session.code.ends_with("-001"));
    assert!(second.session.code.ends_with("-002"));
    // The sequence is per store, not global
    assert!(elsewhere.session.code.ends_with("-001"));
}

#[tokio::test]
async fn create_session_rejects_bad_member_sets() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let order = common::seed_order(&app, store, &[(widget, 2)]).await;

    let err = app
        .services
        .sessions
        .create_session(store, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = app
        .services
        .sessions
        .create_session(store, vec![order, order])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = app
        .services
        .sessions
        .create_session(store, vec![Uuid::new_v4()])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    // An order claimed by a working session cannot join another
    app.services
        .sessions
        .create_session(store, vec![order])
        .await
        .unwrap();
    let err = app
        .services
        .sessions
        .create_session(store, vec![order])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));
}

#[tokio::test]
async fn picking_progress_is_cumulative_and_bounded() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let order = common::seed_order(&app, store, &[(widget, 5)]).await;
    let session = app
        .services
        .sessions
        .create_session(store, vec![order])
        .await
        .unwrap()
        .session;

    // Repeating the same cumulative value is harmless
    app.services
        .picking
        .report_picked(session.id, widget, 3)
        .await
        .unwrap();
    let item = app
        .services
        .picking
        .report_picked(session.id, widget, 3)
        .await
        .unwrap();
    assert_eq!(item.picked_quantity, 3);

    let err = app
        .services
        .picking
        .report_picked(session.id, widget, 6)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = app
        .services
        .picking
        .report_picked(session.id, widget, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let err = app
        .services
        .picking
        .report_picked(session.id, Uuid::new_v4(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn packing_rejects_unknown_lines_and_wrong_phase() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let order = common::seed_order(&app, store, &[(widget, 2)]).await;
    let session = app
        .services
        .sessions
        .create_session(store, vec![order])
        .await
        .unwrap()
        .session;

    // Still picking
    let err = app
        .services
        .packing
        .report_packed(session.id, order, widget)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));

    app.services
        .picking
        .report_picked(session.id, widget, 2)
        .await
        .unwrap();
    app.services.picking.finish_picking(session.id).await.unwrap();

    let err = app
        .services
        .packing
        .report_packed(session.id, order, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn complete_session_requires_every_member_ready() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let gadget = common::seed_product(&app, store, "GADGET", 50).await;
    let order_a = common::seed_order(&app, store, &[(widget, 1)]).await;
    let order_b = common::seed_order(&app, store, &[(gadget, 1)]).await;

    let session = app
        .services
        .sessions
        .create_session(store, vec![order_a, order_b])
        .await
        .unwrap()
        .session;

    app.services
        .picking
        .report_picked(session.id, widget, 1)
        .await
        .unwrap();
    app.services
        .picking
        .report_picked(session.id, gadget, 1)
        .await
        .unwrap();
    app.services.picking.finish_picking(session.id).await.unwrap();

    // Only the first order is packed
    app.services
        .packing
        .report_packed(session.id, order_a, widget)
        .await
        .unwrap();

    let err = app
        .services
        .sessions
        .complete_session(session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));

    app.services
        .packing
        .report_packed(session.id, order_b, gadget)
        .await
        .unwrap();
    app.services
        .sessions
        .complete_session(session.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn abandon_reverts_unfinished_members_and_freezes_ready_ones() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let gadget = common::seed_product(&app, store, "GADGET", 50).await;
    let order_a = common::seed_order(&app, store, &[(widget, 2)]).await;
    let order_b = common::seed_order(&app, store, &[(gadget, 4)]).await;

    let session = app
        .services
        .sessions
        .create_session(store, vec![order_a, order_b])
        .await
        .unwrap()
        .session;

    app.services
        .picking
        .report_picked(session.id, widget, 2)
        .await
        .unwrap();
    app.services
        .picking
        .report_picked(session.id, gadget, 4)
        .await
        .unwrap();
    app.services.picking.finish_picking(session.id).await.unwrap();

    // Order A reaches ready before the session is torn down
    app.services
        .packing
        .report_packed(session.id, order_a, widget)
        .await
        .unwrap();

    let session = app
        .services
        .sessions
        .abandon_session(session.id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Abandoned.as_str());

    // Ready order keeps its status and its reservation
    let order = app.services.orders.get_order(order_a).await.unwrap();
    assert_eq!(order.order.status(), Some(OrderStatus::ReadyToShip));
    assert_eq!(
        app.services
            .inventory
            .get_product(widget)
            .await
            .unwrap()
            .stock_on_hand,
        48
    );

    // Unfinished order goes back to confirmed, nothing was reserved for it
    let order = app.services.orders.get_order(order_b).await.unwrap();
    assert_eq!(order.order.status(), Some(OrderStatus::Confirmed));
    assert_eq!(
        app.services
            .inventory
            .get_product(gadget)
            .await
            .unwrap()
            .stock_on_hand,
        50
    );

    // Working rows are gone
    let items = app
        .services
        .sessions
        .get_picking_list(session.id)
        .await
        .unwrap();
    assert!(items.is_empty());

    // A terminal session cannot be abandoned again
    let err = app
        .services
        .sessions
        .abandon_session(session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));

    // The reverted order is free to join a new session
    app.services
        .sessions
        .create_session(store, vec![order_b])
        .await
        .unwrap();
}

#[tokio::test]
async fn terminal_sessions_reject_progress_reports() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let order = common::seed_order(&app, store, &[(widget, 2)]).await;

    let session_id = common::make_order_ready(&app, store, order, &[(widget, 2)]).await;
    let session = app
        .services
        .sessions
        .complete_session(session_id)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed.as_str());

    let err = app
        .services
        .picking
        .report_picked(session_id, widget, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));

    let err = app
        .services
        .packing
        .report_packed(session_id, order, widget)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));

    let err = app
        .services
        .picking
        .finish_picking(session_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreconditionFailed(_)));
}

#[tokio::test]
async fn losing_the_session_code_race_is_a_retryable_conflict() {
    let app = common::setup().await;
    let store = Uuid::new_v4();
    let widget = common::seed_product(&app, store, "WIDGET", 50).await;
    let order = common::seed_order(&app, store, &[(widget, 1)]).await;

    // A stale-dated session already holds today's first code, so the per-day
    // count says the code is free and the unique index has to break the tie.
    let today = Utc::now().date_naive();
    fulfillment_session::ActiveModel {
        id: Set(Uuid::new_v4()),
        store_id: Set(store),
        code: Set(format!("PREP-{}-001", today.format("%d%m%Y"))),
        status: Set(SessionStatus::Completed.as_str().to_string()),
        created_at: Set(Utc::now() - Duration::days(2)),
        updated_at: Set(None),
    }
    .insert(&*app.db)
    .await
    .unwrap();

    let err = app
        .services
        .sessions
        .create_session(store, vec![order])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert!(err.is_retryable());

    // Losing the race leaves the member order unclaimed
    let order = app.services.orders.get_order(order).await.unwrap();
    assert_eq!(order.order.status(), Some(OrderStatus::Confirmed));
}
