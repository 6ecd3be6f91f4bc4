use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{AppInfo, AppState, DatabaseProbe, Metrics, router};
use service::OrderService;
use service::auth::hash_password;
use service::testing::{Harness, sample_order, sample_product, sample_user};
use tower::ServiceExt;

struct FakeProbe {
    up: bool,
}

#[async_trait]
impl DatabaseProbe for FakeProbe {
    async fn ping(&self) -> anyhow::Result<Duration> {
        if self.up {
            Ok(Duration::from_millis(3))
        } else {
            Err(anyhow::anyhow!("connection refused"))
        }
    }
}

fn app_with(h: &Harness, database_up: bool) -> Router {
    let orders: Arc<dyn OrderService> = Arc::new(h.orders());
    router(AppState {
        auth: Arc::new(h.auth()),
        products: Arc::new(h.products()),
        categories: Arc::new(h.categories()),
        orders,
        payments: Arc::new(h.payments()),
        wishlist: Arc::new(h.wishlist()),
        cache: h.cache.clone(),
        database: Arc::new(FakeProbe { up: database_up }),
        metrics: Arc::new(Metrics::new()),
        info: Arc::new(AppInfo::new("Storefront", "testing", true, "http://api.test/")),
    })
}

fn app(h: &Harness) -> Router {
    app_with(h, true)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Registers a user through the API and returns its bearer token.
async fn register(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            json!({
                "name": "Ayşe Yılmaz",
                "email": email,
                "password": "gizli-sifre",
                "password_confirmation": "gizli-sifre"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_register_then_me() {
    let h = Harness::new();
    let app = app(&h);

    let token = register(&app, "ayse@example.com").await;
    let (status, body) = send(&app, get("/api/v1/auth/me", Some(&token))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["email"], "ayse@example.com");
    assert_eq!(body["data"]["email_verified"], false);
    assert!(body["meta"]["trace_id"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn test_register_validation_errors() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            json!({ "name": "", "email": "nope", "password": "123", "password_confirmation": "321" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["errors"]["name"].is_array());
    assert!(body["errors"]["email"].is_array());
    assert!(body["errors"]["password"].is_array());
}

#[tokio::test]
async fn test_login_reports_unverified_email() {
    let h = Harness::new();
    let mut user = sample_user(1, "mehmet@example.com");
    user.password_hash = hash_password("gizli-sifre").unwrap();
    user.email_verified_at = None;
    h.users.insert(user);
    let app = app(&h);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "mehmet@example.com", "password": "gizli-sifre" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["email_verified"], false);
    assert_eq!(body["errors"]["email"], "mehmet@example.com");
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let h = Harness::new();
    let mut user = sample_user(1, "mehmet@example.com");
    user.password_hash = hash_password("gizli-sifre").unwrap();
    h.users.insert(user);
    let app = app(&h);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            json!({ "email": "mehmet@example.com", "password": "yanlis-sifre" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, get("/api/v1/orders", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthenticated. Please login to continue.");

    let (status, _) = send(&app, get("/api/v1/auth/me", Some("1|not-a-real-secret"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_product_listing_is_paginated() {
    let h = Harness::new();
    for id in 1..=3 {
        h.products_repo.insert(sample_product(id, id * 1_000, 5));
    }
    let app = app(&h);

    let (status, body) = send(&app, get("/api/v1/products?per_page=2&sort_by=price&sort_order=asc", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Products retrieved successfully");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][0]["price"]["amount"], 1_000);
    assert_eq!(body["meta"]["pagination"]["total"], 3);
    assert_eq!(body["meta"]["pagination"]["last_page"], 2);
    assert_eq!(
        body["links"]["next"],
        "http://api.test/api/v1/products?per_page=2&sort_by=price&sort_order=asc&page=2"
    );
    assert!(body["links"]["prev"].is_null());
}

#[tokio::test]
async fn test_product_create_and_duplicate_sku() {
    let h = Harness::new();
    let app = app(&h);
    let token = register(&app, "admin@example.com").await;
    let payload = json!({
        "name": "Seramik Kupa",
        "sku": "MUG-001",
        "price": 24_990,
        "compare_price": 29_990,
        "quantity": 12
    });

    let (status, body) = send(&app, json_request("POST", "/api/v1/products", Some(&token), payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["slug"], "seramik-kupa");
    assert_eq!(body["data"]["discount_percentage"], 17);

    let (status, body) = send(&app, json_request("POST", "/api/v1/products", Some(&token), payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["sku"][0], "The sku has already been taken.");
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, get("/api/v1/products/999", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, get("/api/v1/products/not-a-number", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_place_order_and_forbid_other_users() {
    let h = Harness::new();
    h.products_repo.insert(sample_product(1, 5_000, 4));
    let app = app(&h);
    let buyer = register(&app, "alici@example.com").await;
    let stranger = register(&app, "yabanci@example.com").await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/orders",
            Some(&buyer),
            json!({
                "items": [{ "product_id": 1, "quantity": 2 }],
                "shipping_address": { "firstName": "Ayşe", "lastName": "Yılmaz", "city": "İzmir" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["subtotal"], 10_000);
    assert_eq!(body["data"]["billing"]["city"], "İzmir");
    assert_eq!(h.products_repo.quantity_of(1), Some(2));

    let uri = format!("/api/v1/orders/{}", body["data"]["id"]);
    let (status, _) = send(&app, get(&uri, Some(&buyer))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get(&uri, Some(&stranger))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "You do not have permission to view this order");
}

#[tokio::test]
async fn test_order_with_insufficient_stock() {
    let h = Harness::new();
    h.products_repo.insert(sample_product(1, 5_000, 1));
    let app = app(&h);
    let token = register(&app, "alici@example.com").await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/orders",
            Some(&token),
            json!({ "items": [{ "product_id": 1, "quantity": 3 }] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().starts_with("Insufficient stock"));
    assert_eq!(h.products_repo.quantity_of(1), Some(1));
}

#[tokio::test]
async fn test_order_item_quantity_is_validated() {
    let h = Harness::new();
    let app = app(&h);
    let token = register(&app, "alici@example.com").await;

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/orders",
            Some(&token),
            json!({ "items": [{ "product_id": 1, "quantity": 0 }] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"]["items.0.quantity"][0], "The quantity must be at least 1.");
}

#[tokio::test]
async fn test_wishlist_flow() {
    let h = Harness::new();
    h.products_repo.insert(sample_product(7, 3_000, 2));
    let app = app(&h);
    let token = register(&app, "liste@example.com").await;

    let (status, _) = send(
        &app,
        json_request("POST", "/api/v1/wishlist", Some(&token), json!({ "product_id": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&app, get("/api/v1/wishlist/count", Some(&token))).await;
    assert_eq!(body["data"]["count"], 1);

    let (_, body) = send(&app, get("/api/v1/wishlist/check/7", Some(&token))).await;
    assert_eq!(body["data"]["in_wishlist"], true);

    let (status, body) = send(
        &app,
        json_request("POST", "/api/v1/wishlist/toggle", Some(&token), json!({ "product_id": 7 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["added"], false);
    assert_eq!(body["message"], "Product removed from wishlist");

    let delete = Request::delete("/api/v1/wishlist/7")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Product not found in wishlist");
}

#[tokio::test]
async fn test_payment_initiation_returns_iframe() {
    let h = Harness::new();
    let app = app(&h);
    let token = register(&app, "odeme@example.com").await;
    let (_, me) = send(&app, get("/api/v1/auth/me", Some(&token))).await;
    h.orders_repo.insert(sample_order(50, me["data"]["id"].as_i64().unwrap()));

    let (status, body) = send(
        &app,
        json_request("POST", "/api/v1/payments/initiate", Some(&token), json!({ "order_id": 50 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["success"], true);
    assert_eq!(body["data"]["token"], "fake-token-1");
    assert_eq!(body["data"]["iframe_url"], "https://www.paytr.com/odeme/guvenli/fake-token-1");

    let status_uri = format!(
        "/api/v1/payments/{}/status",
        body["data"]["merchant_oid"].as_str().unwrap()
    );
    let (status, body) = send(&app, get(&status_uri, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "processing");
    assert_eq!(body["data"]["order_id"], 50);
}

fn notify_request(body: &str) -> Request<Body> {
    Request::post("/api/v1/payments/notify")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send_text(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

#[tokio::test]
async fn test_notify_replies_in_plain_text() {
    let h = Harness::new();
    let app = app(&h);

    let (status, text) = send_text(
        &app,
        notify_request("merchant_oid=ORDX1&status=success&total_amount=12000&hash=forged"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(text, "Bad hash");

    let body = signed_notification(&h, "ORDUNKNOWN", "success", 12_000);
    let (status, text) = send_text(&app, notify_request(&body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(text, "Order not found");
}

fn signed_notification(h: &Harness, merchant_oid: &str, status: &str, amount: i64) -> String {
    let hash = h.signer.notification_signature(merchant_oid, status, amount);
    format!(
        "merchant_oid={merchant_oid}&status={status}&total_amount={amount}&hash={}",
        hash.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
    )
}

#[tokio::test]
async fn test_repeated_success_notification_answers_ok() {
    let h = Harness::new();
    let app = app(&h);
    let token = register(&app, "tekrar@example.com").await;
    let (_, me) = send(&app, get("/api/v1/auth/me", Some(&token))).await;
    h.orders_repo.insert(sample_order(60, me["data"]["id"].as_i64().unwrap()));
    let (_, body) = send(
        &app,
        json_request("POST", "/api/v1/payments/initiate", Some(&token), json!({ "order_id": 60 })),
    )
    .await;
    let merchant_oid = body["data"]["merchant_oid"].as_str().unwrap().to_string();

    let notification = signed_notification(&h, &merchant_oid, "success", 12_000);
    for _ in 0..2 {
        let (status, text) = send_text(&app, notify_request(&notification)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "OK");
    }

    let status_uri = format!("/api/v1/payments/{merchant_oid}/status");
    let (_, body) = send(&app, get(&status_uri, Some(&token))).await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(h.events.names().iter().filter(|n| **n == "payment_completed").count(), 1);
}

#[tokio::test]
async fn test_health_probes() {
    let h = Harness::new();

    let (status, body) = send(&app(&h), get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app(&h), get("/api/health/detailed", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["database"]["status"], "healthy");

    let down = app_with(&h, false);
    let (status, body) = send(&down, get("/api/health/detailed", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    let (status, body) = send(&down, get("/api/health/readiness", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "not ready");

    let (_, body) = send(&down, get("/api/health/liveness", None)).await;
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_unknown_route_and_wrong_method() {
    let h = Harness::new();
    let app = app(&h);

    let (status, body) = send(&app, get("/api/v1/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "The requested resource was not found.");

    let (status, _) = send(&app, json_request("DELETE", "/api/v1/auth/login", None, json!({}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_trace_id_is_echoed() {
    let h = Harness::new();
    let app = app(&h);

    let req = Request::get("/api/v1/categories")
        .header("x-trace-id", "trace-abc")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.headers()["x-trace-id"], "trace-abc");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["meta"]["trace_id"], "trace-abc");
}

#[tokio::test]
async fn test_metrics_endpoint_counts_requests() {
    let h = Harness::new();
    let app = app(&h);

    send(&app, get("/api/health", None)).await;
    let (status, text) = send_text(&app, get("/metrics", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains(r#"endpoint="/api/health""#));
}
