use axum::extract::{Path, Query, State};
use tracing::info;

use super::ApiResult;
use crate::extract::{AuthUser, Id, ValidJson};
use crate::requests::{CreateProductRequest, ProductQuery, UpdateProductRequest};
use crate::resources::ProductResource;
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn index(State(state): State<AppState>, Query(query): Query<ProductQuery>) -> ApiResult {
    let page = state.products.list(&query.filter()).await?;
    Ok(ApiResponse::paginated(
        page,
        |product| ProductResource::from(&product),
        "Products retrieved successfully",
    ))
}

pub async fn show(State(state): State<AppState>, Id(id): Id) -> ApiResult {
    let product = state.products.get(id).await?;
    Ok(ApiResponse::ok(
        ProductResource::from(&product),
        "Product retrieved successfully",
    ))
}

pub async fn show_by_slug(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    let product = state.products.get_by_slug(&slug).await?;
    Ok(ApiResponse::ok(
        ProductResource::from(&product),
        "Product retrieved successfully",
    ))
}

pub async fn store(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    ValidJson(req): ValidJson<CreateProductRequest>,
) -> ApiResult {
    let (input, categories) = req.into_parts();
    let product = state.products.create(input, categories).await?;
    info!(user_id = auth.user.id, product_id = product.id, "Product created via API");
    Ok(ApiResponse::created(
        ProductResource::from(&product),
        "Product created successfully",
    ))
}

pub async fn update(
    State(state): State<AppState>,
    _auth: AuthUser,
    Id(id): Id,
    ValidJson(req): ValidJson<UpdateProductRequest>,
) -> ApiResult {
    let (changes, categories) = req.into_parts();
    let product = state.products.update(id, changes, categories).await?;
    Ok(ApiResponse::ok(
        ProductResource::from(&product),
        "Product updated successfully",
    ))
}

pub async fn destroy(State(state): State<AppState>, _auth: AuthUser, Id(id): Id) -> ApiResult {
    state.products.delete(id).await?;
    Ok(ApiResponse::message("Product deleted successfully"))
}
