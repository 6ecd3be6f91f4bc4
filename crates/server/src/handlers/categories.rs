use axum::extract::{Path, Query, State};

use super::ApiResult;
use crate::extract::Id;
use crate::requests::CategoryQuery;
use crate::resources::CategoryResource;
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn index(State(state): State<AppState>, Query(query): Query<CategoryQuery>) -> ApiResult {
    let categories = state
        .categories
        .list_active(query.parent(), query.with_children())
        .await?;
    let data: Vec<CategoryResource> = categories.iter().map(CategoryResource::from).collect();
    Ok(ApiResponse::ok(data, "Categories retrieved successfully"))
}

pub async fn show(State(state): State<AppState>, Id(id): Id) -> ApiResult {
    let category = state.categories.find_by_id(id).await?;
    Ok(ApiResponse::ok(
        CategoryResource::from(&category),
        "Category retrieved successfully",
    ))
}

pub async fn show_by_slug(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    let category = state.categories.find_by_slug(&slug).await?;
    Ok(ApiResponse::ok(
        CategoryResource::from(&category),
        "Category retrieved successfully",
    ))
}
