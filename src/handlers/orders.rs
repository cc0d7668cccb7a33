use axum::{
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::{inventory_movement, order};
use crate::services::compensation::{RemovalKind, RemovalReport};
use crate::services::orders::{CreateOrderInput, OrderDetail};
use crate::{ApiResponse, ApiResult, AppState};

pub fn orders_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order).delete(delete_order))
        .route("/:id/movements", get(get_order_movements))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct OrderFilters {
    pub store_id: Uuid,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RemovalParams {
    /// When true the order row is purged; otherwise it is cancelled in place.
    #[serde(default)]
    pub hard: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderInput,
    responses(
        (status = 200, description = "Order created"),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(input): Json<CreateOrderInput>,
) -> ApiResult<OrderDetail> {
    let detail = state.services.orders.create_order(input).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderFilters),
    responses((status = 200, description = "Orders in the store")),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filters): Query<OrderFilters>,
) -> ApiResult<Vec<order::Model>> {
    let orders = state.services.orders.list_orders(filters.store_id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses(
        (status = 200, description = "Order found"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderDetail> {
    let detail = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// Cancels the order, or purges it entirely with `?hard=true`. Stock the
/// ledger still owes the order is restored either way; both forms are safe
/// to replay.
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    params(RemovalParams),
    responses(
        (status = 200, description = "Order removed (or removal replayed)"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent operation in flight", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<RemovalParams>,
) -> ApiResult<RemovalReport> {
    let kind = if params.hard {
        RemovalKind::HardDelete
    } else {
        RemovalKind::Cancel
    };
    let report = state.services.compensation.remove_order(id, kind).await?;
    Ok(Json(ApiResponse::success(report)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/movements",
    responses((status = 200, description = "Inventory movements recorded for the order")),
    tag = "orders"
)]
pub async fn get_order_movements(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<inventory_movement::Model>> {
    // The order row may legitimately be gone after a hard delete while its
    // ledger rows remain, so no existence check here.
    let movements = state.services.inventory.movements_for_order(id).await?;
    Ok(Json(ApiResponse::success(movements)))
}
