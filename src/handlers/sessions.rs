use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{fulfillment_session, picking_item};
use crate::services::packing::PackingOutcome;
use crate::services::sessions::SessionDetail;
use crate::{ApiResponse, ApiResult, AppState};

pub fn sessions_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/:id", get(get_session))
        .route("/:id/picking-list", get(get_picking_list))
        .route("/:id/picking-progress", post(report_picked))
        .route("/:id/finish-picking", post(finish_picking))
        .route("/:id/packing-progress", post(report_packed))
        .route("/:id/complete", post(complete_session))
        .route("/:id/abandon", post(abandon_session))
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub store_id: Uuid,
    #[validate(length(min = 1, message = "A session needs at least one order"))]
    pub order_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PickingProgressRequest {
    pub product_id: Uuid,
    /// Cumulative units picked so far, not an increment.
    pub picked_quantity: i32,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PackingProgressRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created over the given orders"),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already claimed", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(input): Json<CreateSessionRequest>,
) -> ApiResult<SessionDetail> {
    input.validate()?;
    let detail = state
        .services
        .sessions
        .create_session(input.store_id, input.order_ids)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    responses(
        (status = 200, description = "Session found"),
        (status = 404, description = "Session not found", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<SessionDetail> {
    let detail = state.services.sessions.get_session(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/picking-list",
    responses((status = 200, description = "Aggregated per-product picking totals")),
    tag = "sessions"
)]
pub async fn get_picking_list(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<picking_item::Model>> {
    let items = state.services.sessions.get_picking_list(id).await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/picking-progress",
    request_body = PickingProgressRequest,
    responses(
        (status = 200, description = "Progress recorded"),
        (status = 400, description = "Quantity out of range or regressing", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session is not picking", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn report_picked(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PickingProgressRequest>,
) -> ApiResult<picking_item::Model> {
    let item = state
        .services
        .picking
        .report_picked(id, input.product_id, input.picked_quantity)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/finish-picking",
    responses(
        (status = 200, description = "Session moved to packing"),
        (status = 409, description = "Picking incomplete", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn finish_picking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<fulfillment_session::Model> {
    let session = state.services.picking.finish_picking(id).await?;
    Ok(Json(ApiResponse::success(session)))
}

/// Marks one (order, product) as packed. Completing the order's last line
/// reserves stock for the whole order and moves it to ready-to-ship.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/packing-progress",
    request_body = PackingProgressRequest,
    responses(
        (status = 200, description = "Packing recorded"),
        (status = 409, description = "Concurrent stock operation", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn report_packed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<PackingProgressRequest>,
) -> ApiResult<PackingOutcome> {
    let outcome = state
        .services
        .packing
        .report_packed(id, input.order_id, input.product_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/complete",
    responses(
        (status = 200, description = "Session completed"),
        (status = 409, description = "Members not all ready to ship", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn complete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<fulfillment_session::Model> {
    let session = state.services.sessions.complete_session(id).await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/abandon",
    responses(
        (status = 200, description = "Session abandoned"),
        (status = 409, description = "Session already terminal", body = crate::errors::ErrorResponse)
    ),
    tag = "sessions"
)]
pub async fn abandon_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<fulfillment_session::Model> {
    let session = state.services.sessions.abandon_session(id).await?;
    Ok(Json(ApiResponse::success(session)))
}
