use axum::extract::{Query, State};

use super::ApiResult;
use crate::error::ApiError;
use crate::extract::{AuthUser, Id, ValidJson};
use crate::requests::{CreateOrderRequest, PageQuery};
use crate::resources::OrderResource;
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn index(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Query(query): Query<PageQuery>,
) -> ApiResult {
    let page = state.orders.user_orders(auth.user.id, query.request()).await?;
    Ok(ApiResponse::paginated(
        page,
        |order| OrderResource::from(&order),
        "Orders retrieved successfully",
    ))
}

pub async fn store(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    ValidJson(req): ValidJson<CreateOrderRequest>,
) -> ApiResult {
    let order = state.orders.create_order(req.into_order(auth.user.id)).await?;
    Ok(ApiResponse::created(
        OrderResource::from(&order),
        "Order created successfully",
    ))
}

pub async fn show(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Id(id): Id,
) -> ApiResult {
    let order = state.orders.find_by_id(id).await?;
    if !order.belongs_to(auth.user.id) {
        return Err(ApiError::Forbidden(
            "You do not have permission to view this order".into(),
        ));
    }
    Ok(ApiResponse::ok(
        OrderResource::from(&order),
        "Order retrieved successfully",
    ))
}

pub async fn cancel(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Id(id): Id,
) -> ApiResult {
    let order = state.orders.find_by_id(id).await?;
    if !order.belongs_to(auth.user.id) {
        return Err(ApiError::Forbidden(
            "You do not have permission to cancel this order".into(),
        ));
    }
    let order = state.orders.cancel_order(order.id).await?;
    Ok(ApiResponse::ok(
        OrderResource::from(&order),
        "Order cancelled successfully",
    ))
}
