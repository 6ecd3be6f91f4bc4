//! The JSON envelope every API endpoint answers with.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use model::Page;
use serde::Serialize;
use serde_json::{Map, Value, json};
use service::RequestContext;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub current_page: u32,
    pub per_page: u32,
    pub total: i64,
    pub last_page: u32,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Links {
    pub first: String,
    pub last: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// `{success, message, data, meta}`, plus `links` for paginated data.
#[derive(Debug)]
pub struct ApiResponse {
    status: StatusCode,
    message: String,
    data: Value,
    pagination: Option<(Pagination, Links)>,
}

impl ApiResponse {
    pub fn ok(data: impl Serialize, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: impl Serialize, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    /// A success without payload (`data: null`).
    pub fn message(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::OK, Value::Null, message)
    }

    pub fn paginated<T, R: Serialize>(
        page: Page<T>,
        map: impl FnMut(T) -> R,
        message: impl Into<String>,
    ) -> Self {
        let url = RequestContext::current()
            .and_then(|ctx| ctx.url.clone())
            .unwrap_or_default();
        let pagination = Pagination {
            current_page: page.page,
            per_page: page.per_page,
            total: page.total,
            last_page: page.last_page(),
            from: page.from(),
            to: page.to(),
        };
        let links = Links {
            first: page_url(&url, 1),
            last: page_url(&url, pagination.last_page),
            prev: (page.page > 1).then(|| page_url(&url, page.page - 1)),
            next: (page.page < pagination.last_page).then(|| page_url(&url, page.page + 1)),
        };
        let items: Vec<R> = page.items.into_iter().map(map).collect();

        let mut response = Self::ok(items, message);
        response.pagination = Some((pagination, links));
        response
    }

    fn with_status(status: StatusCode, data: impl Serialize, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            pagination: None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut meta = meta();
        let mut body = json!({
            "success": true,
            "message": self.message,
            "data": self.data,
        });
        if let Some((pagination, links)) = self.pagination {
            meta.insert("pagination".into(), json!(pagination));
            body["links"] = json!(links);
        }
        body["meta"] = Value::Object(meta);
        (self.status, Json(body)).into_response()
    }
}

/// `{timestamp, trace_id}` of the current request.
pub fn meta() -> Map<String, Value> {
    let trace_id = RequestContext::current()
        .map(|ctx| ctx.trace_id.clone())
        .unwrap_or_default();
    let mut meta = Map::new();
    meta.insert("timestamp".into(), json!(now_iso()));
    meta.insert("trace_id".into(), json!(trace_id));
    meta
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `url` with its `page` query parameter replaced.
pub fn page_url(url: &str, page: u32) -> String {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("page="))
        .collect();
    let page = format!("page={page}");
    params.push(&page);
    format!("{path}?{}", params.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::PageRequest;
    use std::sync::Arc;

    #[test]
    fn test_page_url_replaces_page() {
        assert_eq!(
            page_url("http://api.test/api/v1/products?search=kupa&page=2&per_page=5", 3),
            "http://api.test/api/v1/products?search=kupa&per_page=5&page=3"
        );
        assert_eq!(page_url("http://api.test/x", 1), "http://api.test/x?page=1");
    }

    #[tokio::test]
    async fn test_paginated_meta_and_links() {
        let ctx = Arc::new(RequestContext::new(
            "trace-page",
            None,
            None,
            Some("http://api.test/api/v1/orders?page=2&per_page=2".into()),
        ));
        let page = Page::new(vec![3, 4], 5, PageRequest::new(Some(2), Some(2)));

        let response = ctx
            .scope(async { ApiResponse::paginated(page, |n| n * 10, "Orders retrieved successfully").into_response() })
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"], json!([30, 40]));
        assert_eq!(body["meta"]["trace_id"], "trace-page");
        assert_eq!(body["meta"]["pagination"]["last_page"], 3);
        assert_eq!(body["meta"]["pagination"]["from"], 3);
        assert_eq!(body["links"]["prev"], "http://api.test/api/v1/orders?per_page=2&page=1");
        assert_eq!(body["links"]["next"], "http://api.test/api/v1/orders?per_page=2&page=3");
    }
}
