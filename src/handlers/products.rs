use axum::{
    extract::{Json, Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::{inventory_movement, product};
use crate::services::inventory::CreateProductInput;
use crate::{ApiResponse, ApiResult, AppState};

pub fn products_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product))
        .route("/:id/movements", get(get_movements))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ProductFilters {
    pub store_id: Uuid,
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductInput,
    responses(
        (status = 200, description = "Product created"),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse)
    ),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> ApiResult<product::Model> {
    let product = state.services.inventory.create_product(input).await?;
    Ok(Json(ApiResponse::success(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilters),
    responses((status = 200, description = "Products in the store")),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(filters): Query<ProductFilters>,
) -> ApiResult<Vec<product::Model>> {
    let products = state
        .services
        .inventory
        .list_products(filters.store_id)
        .await?;
    Ok(Json(ApiResponse::success(products)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    responses(
        (status = 200, description = "Product found"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<product::Model> {
    let product = state.services.inventory.get_product(id).await?;
    Ok(Json(ApiResponse::success(product)))
}

/// The product's ledger, oldest first.
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/movements",
    responses(
        (status = 200, description = "Inventory movements for the product"),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "products"
)]
pub async fn get_movements(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<inventory_movement::Model>> {
    // 404 for a product that never existed, not an empty ledger
    state.services.inventory.get_product(id).await?;
    let movements = state.services.inventory.movements_for_product(id).await?;
    Ok(Json(ApiResponse::success(movements)))
}
