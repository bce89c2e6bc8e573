// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rate limiter and CORS layer behavior in isolation from route logic,
//! over minimal routers that carry only the layer under test.

use agp_daemon::middleware::{request_id_middleware, CorsConfig, RateLimiter};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware;
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tower::ServiceExt;

fn app_with_rate_limiter(max: u32, window: Duration) -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(RateLimiter::new(max, window).into_layer())
}

// ---------------------------------------------------------------------------
// 1. RateLimiter — allows up to the configured ceiling, then rejects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limiter_allows_up_to_the_limit_then_rejects() {
    let app = app_with_rate_limiter(3, Duration::from_secs(60));

    for i in 0..3 {
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "request #{i} should be allowed");
    }

    let resp = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn rate_limiter_buckets_are_independent_per_caller() {
    let app = app_with_rate_limiter(1, Duration::from_secs(60));

    let resp_a = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header("authorization", "Bearer caller-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp_a.status(), StatusCode::OK);

    let resp_b = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header("authorization", "Bearer caller-b")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp_b.status(), StatusCode::OK, "a different caller must not share the bucket");

    let resp_a_again = app
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header("authorization", "Bearer caller-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp_a_again.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn unauthenticated_callers_share_an_anonymous_bucket() {
    let app = app_with_rate_limiter(1, Duration::from_secs(60));

    let first = app
        .clone()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

// ---------------------------------------------------------------------------
// 2. RequestId middleware, exercised through its public entry point
// ---------------------------------------------------------------------------

fn app_with_request_id() -> Router {
    Router::new()
        .route("/ping", get(|| async { "pong" }))
        .layer(middleware::from_fn(request_id_middleware))
}

#[tokio::test]
async fn request_id_header_is_a_valid_uuid() {
    let app = app_with_request_id();
    let resp = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let header = resp.headers().get("x-request-id").expect("missing x-request-id");
    let parsed: uuid::Uuid = header.to_str().unwrap().parse().expect("not a valid uuid");
    assert_ne!(parsed, uuid::Uuid::nil());
}

// ---------------------------------------------------------------------------
// 3. CorsConfig — default method/header allow-lists cover the AGP surface
// ---------------------------------------------------------------------------

#[test]
fn cors_config_allows_the_methods_every_route_family_needs() {
    let cors = CorsConfig::new(vec!["https://app.example.com".to_string()]);
    assert!(cors.allowed_methods.contains(&"POST".to_string()));
    assert!(cors.allowed_methods.contains(&"DELETE".to_string()));
    assert!(cors.allowed_methods.contains(&"PATCH".to_string()));
}

#[test]
fn cors_config_allows_the_idempotency_key_header() {
    let cors = CorsConfig::new(vec![]);
    assert!(cors.allowed_headers.contains(&"idempotency-key".to_string()));
}

#[test]
fn cors_layer_builds_without_panicking_on_empty_origins() {
    let cors = CorsConfig::new(vec![]);
    let _layer = cors.to_cors_layer();
}
