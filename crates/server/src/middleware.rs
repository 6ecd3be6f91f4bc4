//! Request tracing and metrics middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use service::RequestContext;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics::Metrics;
use crate::state::AppState;

pub const TRACE_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

const MASK: &str = "***MASKED***";
const MAX_LOGGED_BODY: usize = 1024 * 1024;
const SENSITIVE_KEYS: [&str; 8] = [
    "password",
    "password_confirmation",
    "current_password",
    "credit_card",
    "cvv",
    "card_number",
    "token",
    "secret",
];

/// Installs the [`RequestContext`] for the request, logs the request with
/// sensitive fields masked, logs the response and echoes `X-Trace-Id`.
pub async fn trace_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let trace_id = req
        .headers()
        .get(&TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let url = format!("{}{}", state.info.url, path_and_query);
    let ip = client_ip(&req);
    let user_agent = header_string(req.headers(), USER_AGENT.as_str());

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::BadRequest("Request body is too large.".into()).into_response();
        }
    };
    let content_type = header_string(&parts.headers, CONTENT_TYPE.as_str()).unwrap_or_default();
    let logged_body = masked_body(&content_type, &bytes);

    info!(
        trace_id = %trace_id,
        method = %method,
        url = %url,
        ip = ip.as_deref().unwrap_or("-"),
        user_agent = user_agent.as_deref().unwrap_or("-"),
        body = %logged_body,
        "Incoming request"
    );

    let ctx = Arc::new(RequestContext::new(
        trace_id.clone(),
        ip,
        user_agent,
        Some(url.clone()),
    ));
    let req = Request::from_parts(parts, Body::from(bytes));
    let mut response = ctx.clone().scope(next.run(req)).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;
    let user_id = ctx.user_id();
    if status >= 500 {
        error!(trace_id = %trace_id, method = %method, url = %url, status, duration_ms, user_id, "Request completed");
    } else if status >= 400 {
        warn!(trace_id = %trace_id, method = %method, url = %url, status, duration_ms, user_id, "Request completed");
    } else {
        info!(trace_id = %trace_id, method = %method, url = %url, status, duration_ms, user_id, "Request completed");
    }

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}

/// Records request count, duration, errors and traffic per matched route.
pub async fn track_metrics(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    if let Some(bytes) = content_length(req.headers()).filter(|n| *n > 0) {
        metrics.record_network_traffic("in", bytes);
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16();

    metrics.record_request(&method, &endpoint, status, start.elapsed());
    if status >= 400 {
        metrics.record_error("http", &endpoint);
    }
    if let Some(bytes) = content_length(response.headers()).filter(|n| *n > 0) {
        metrics.record_network_traffic("out", bytes);
    }
    response
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn client_ip(req: &Request) -> Option<String> {
    let headers = req.headers();
    if let Some(forwarded) = header_string(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return Some(first.to_string());
        }
    }
    if let Some(real) = header_string(headers, "x-real-ip").filter(|s| !s.is_empty()) {
        return Some(real);
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key.contains(s))
}

/// Body as logged: JSON and form payloads with sensitive values replaced.
pub fn masked_body(content_type: &str, bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    if content_type.starts_with("application/json") {
        if let Ok(mut value) = serde_json::from_slice::<Value>(bytes) {
            mask_json(&mut value);
            return value.to_string();
        }
    }
    let text = String::from_utf8_lossy(bytes);
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return text
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if is_sensitive(key) => format!("{key}={MASK}"),
                _ => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join("&");
    }
    format!("<{} bytes>", bytes.len())
}

fn mask_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if is_sensitive(key) {
                    *field = Value::String(MASK.to_string());
                } else {
                    mask_json(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_json),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_bodies_are_masked_recursively() {
        let body = json!({
            "email": "ayse@example.com",
            "password": "gizli123",
            "card": { "card_number": "4111", "holder": "AYSE" },
            "api_secret_key": "x"
        });
        let logged = masked_body("application/json", body.to_string().as_bytes());
        let logged: Value = serde_json::from_str(&logged).unwrap();

        assert_eq!(logged["email"], "ayse@example.com");
        assert_eq!(logged["password"], MASK);
        assert_eq!(logged["card"]["card_number"], MASK);
        assert_eq!(logged["card"]["holder"], "AYSE");
        assert_eq!(logged["api_secret_key"], MASK);
    }

    #[test]
    fn test_form_bodies_are_masked() {
        let logged = masked_body(
            "application/x-www-form-urlencoded",
            b"merchant_oid=SIP1&status=success&hash=abc&paytr_token=zzz",
        );
        assert_eq!(
            logged,
            "merchant_oid=SIP1&status=success&hash=abc&paytr_token=***MASKED***"
        );
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req).as_deref(), Some("203.0.113.7"));

        let req = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req).as_deref(), Some("198.51.100.2"));
    }
}
