use std::collections::HashMap;

use axum::Form;
use axum::extract::rejection::FormRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use service::{NotificationOutcome, RequestContext};
use tracing::{error, info, warn};

use super::ApiResult;
use crate::extract::{AuthUser, ValidJson};
use crate::requests::InitiatePaymentRequest;
use crate::resources::PaymentStatusResource;
use crate::response::ApiResponse;
use crate::state::AppState;

const FALLBACK_IP: &str = "127.0.0.1";

pub async fn initiate(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    ValidJson(req): ValidJson<InitiatePaymentRequest>,
) -> ApiResult {
    let ip = RequestContext::current()
        .and_then(|ctx| ctx.ip.clone())
        .unwrap_or_else(|| FALLBACK_IP.to_string());
    let started = state
        .payments
        .initiate(&auth.user, req.order_id, &ip, req.terms_accepted)
        .await?;
    Ok(ApiResponse::ok(
        json!({
            "success": true,
            "token": started.token,
            "merchant_oid": started.merchant_oid,
            "payment_id": started.payment_id,
            "iframe_url": started.iframe_url,
        }),
        "Payment initiated successfully",
    ))
}

pub async fn status(
    State(state): State<AppState>,
    AuthUser(auth): AuthUser,
    Path(merchant_oid): Path<String>,
) -> ApiResult {
    let payment = state.payments.status(&merchant_oid, auth.user.id).await?;
    Ok(ApiResponse::ok(
        PaymentStatusResource::from(&payment),
        "Payment status retrieved",
    ))
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, [(CONTENT_TYPE, "text/plain")], body).into_response()
}

/// Gateway callback. The gateway retries anything but `OK`, so internal
/// failures are logged and acknowledged.
pub async fn notify(
    State(state): State<AppState>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Response {
    let data = match form {
        Ok(Form(data)) => data,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable payment notification");
            HashMap::new()
        }
    };
    let merchant_oid = data.get("merchant_oid").map(String::as_str).unwrap_or("unknown");
    let status = data.get("status").map(String::as_str).unwrap_or("unknown");
    info!(merchant_oid, status, "Payment notification received");

    match state.payments.handle_notification(&data).await {
        Ok(NotificationOutcome::HashMismatch) => plain(StatusCode::BAD_REQUEST, "Bad hash"),
        Ok(NotificationOutcome::NotFound) => plain(StatusCode::NOT_FOUND, "Order not found"),
        Ok(outcome) => {
            info!(merchant_oid, outcome = outcome.as_str(), "Payment notification handled");
            plain(StatusCode::OK, "OK")
        }
        Err(err) => {
            error!(merchant_oid, error = %err, "Payment notification failed");
            plain(StatusCode::OK, "OK")
        }
    }
}
