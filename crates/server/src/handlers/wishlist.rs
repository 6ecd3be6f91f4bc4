use axum::extract::{Query, State};
use serde_json::json;

use super::ApiResult;
use crate::error::ApiError;
use crate::extract::{AuthUser, Id, ValidJson};
use crate::requests::{PageQuery, WishlistRequest};
use crate::resources::WishlistItemResource;
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn index(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = state.wishlist.list(auth.user.id, query.request()).await?;
    Ok(ApiResponse::paginated(
        page,
        |item| WishlistItemResource::from(&item),
        "Wishlist retrieved successfully",
    ))
}

pub async fn store(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    ValidJson(req): ValidJson<WishlistRequest>,
) -> ApiResult {
    let item = state.wishlist.add(auth.user.id, req.product_id).await?;
    Ok(ApiResponse::created(
        WishlistItemResource::from(&item),
        "Product added to wishlist",
    ))
}

pub async fn destroy(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Id(product_id): Id,
) -> ApiResult {
    if !state.wishlist.remove(auth.user.id, product_id).await? {
        return Err(ApiError::NotFound("Product not found in wishlist".into()));
    }
    Ok(ApiResponse::message("Product removed from wishlist"))
}

pub async fn toggle(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    ValidJson(req): ValidJson<WishlistRequest>,
) -> ApiResult {
    let result = state.wishlist.toggle(auth.user.id, req.product_id).await?;
    Ok(ApiResponse::ok(result, result.message()))
}

pub async fn check(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Id(product_id): Id,
) -> ApiResult {
    let in_wishlist = state.wishlist.contains(auth.user.id, product_id).await?;
    Ok(ApiResponse::ok(
        json!({ "in_wishlist": in_wishlist, "product_id": product_id }),
        "Wishlist status retrieved",
    ))
}

pub async fn count(State(state): State<AppState>, AuthUser(auth): AuthUser) -> ApiResult {
    let count = state.wishlist.count(auth.user.id).await?;
    Ok(ApiResponse::ok(json!({ "count": count }), "Wishlist count retrieved"))
}

pub async fn clear(State(state): State<AppState>, AuthUser(auth): AuthUser) -> ApiResult {
    let removed = state.wishlist.clear(auth.user.id).await?;
    Ok(ApiResponse::ok(
        json!({ "items_removed": removed }),
        "Wishlist cleared successfully",
    ))
}
