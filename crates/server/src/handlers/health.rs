//! Health probes. These answer with bare JSON rather than the envelope.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::response::now_iso;
use crate::state::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "timestamp": now_iso() }))
}

pub async fn detailed(State(state): State<AppState>) -> Response {
    let database = match state.database.ping().await {
        Ok(latency) => json!({
            "status": "healthy",
            "latency_ms": latency.as_secs_f64() * 1000.0,
        }),
        Err(err) => {
            error!(error = %err, "Database health check failed");
            json!({ "status": "unhealthy", "error": "Database connection failed" })
        }
    };
    let cache = json!({ "status": "healthy", "entries": state.cache.entries().await });
    let app = json!({
        "status": "healthy",
        "name": state.info.name,
        "debug": state.info.debug,
    });

    let healthy = [&app, &database, &cache]
        .iter()
        .all(|check| check["status"] == "healthy");
    if !healthy {
        warn!("Detailed health check reports unhealthy components");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "timestamp": now_iso(),
        "version": state.info.version,
        "environment": state.info.env,
        "checks": { "app": app, "database": database, "cache": cache },
    });
    (status, Json(body)).into_response()
}

pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

pub async fn readiness(State(state): State<AppState>) -> Response {
    match state.database.ping().await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(err) => {
            warn!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not ready" })),
            )
                .into_response()
        }
    }
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
