use axum::extract::{Path, State};
use serde_json::json;
use tracing::info;

use super::ApiResult;
use crate::extract::{AuthUser, ValidJson};
use crate::requests::{LoginRequest, RegisterRequest, ResendVerificationRequest};
use crate::resources::{ProfileResource, UserResource};
use crate::response::ApiResponse;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> ApiResult {
    let session = state.auth.register(req.into()).await?;
    Ok(ApiResponse::created(
        json!({
            "user": UserResource::from(&session.user),
            "token": session.token,
            "token_type": "Bearer",
            "message": "Please check your email to verify your account.",
        }),
        "User registered successfully. Verification email sent.",
    ))
}

pub async fn verify_email(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult {
    let user = state.auth.verify_email(&token).await?;
    Ok(ApiResponse::ok(
        json!({ "user": UserResource::from(&user) }),
        "Email verified successfully",
    ))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ResendVerificationRequest>,
) -> ApiResult {
    state.auth.resend_verification(&req.email).await?;
    Ok(ApiResponse::message("Verification email sent"))
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult {
    let session = state.auth.login(&req.email, &req.password).await?;
    Ok(ApiResponse::ok(
        json!({
            "user": UserResource::from(&session.user),
            "token": session.token,
            "token_type": "Bearer",
        }),
        "Login successful",
    ))
}

pub async fn me(AuthUser(auth): AuthUser) -> ApiResult {
    Ok(ApiResponse::ok(
        ProfileResource::from(&auth.user),
        "User retrieved successfully",
    ))
}

pub async fn logout(State(state): State<AppState>, AuthUser(auth): AuthUser) -> ApiResult {
    state.auth.logout(auth.token_id).await?;
    info!(user_id = auth.user.id, "User logged out");
    Ok(ApiResponse::message("Logged out successfully"))
}

pub async fn logout_all(State(state): State<AppState>, AuthUser(auth): AuthUser) -> ApiResult {
    state.auth.logout_all(auth.user.id).await?;
    Ok(ApiResponse::message("Logged out from all devices successfully"))
}
