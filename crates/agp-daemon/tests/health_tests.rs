// SPDX-License-Identifier: MIT OR Apache-2.0
//! Liveness endpoint and request-id/CORS middleware behavior.

mod support;

use agp_daemon::build_app;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use support::{get_json, test_state};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// 1. Health endpoint – returns JSON with required fields
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_json_with_required_fields() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert!(json.get("status").is_some());
    assert!(json.get("version").is_some());
    assert!(json.get("environment").is_some());
    assert!(json.get("timestamp").is_some());
}

#[tokio::test]
async fn health_status_is_ok() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let (_, json) = get_json(app, "/health").await;

    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn health_reports_contract_version() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let (_, json) = get_json(app, "/health").await;

    assert_eq!(json["version"], agp_core::CONTRACT_VERSION);
}

#[tokio::test]
async fn health_includes_zeroed_call_and_job_summaries_on_boot() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let (_, json) = get_json(app, "/health").await;

    assert!(json.get("calls").is_some());
    assert!(json.get("jobs").is_some());
}

// ---------------------------------------------------------------------------
// 2. Request-id middleware — every response carries `x-request-id`
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_response_carries_a_request_id_header() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(resp.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn request_ids_differ_across_requests() {
    let (state, _tmp) = test_state().await;

    let app1 = build_app(state.clone());
    let resp1 = app1
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id1 = resp1.headers().get("x-request-id").unwrap().to_str().unwrap().to_string();

    let app2 = build_app(state);
    let resp2 = app2
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id2 = resp2.headers().get("x-request-id").unwrap().to_str().unwrap().to_string();

    assert_ne!(id1, id2);
}

// ---------------------------------------------------------------------------
// 3. Unknown routes 404 rather than panicking through the middleware stack
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let resp = app
        .oneshot(Request::builder().uri("/no/such/route").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// 4. Repeated health checks all succeed (no shared-state corruption)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rapid_health_checks_all_succeed() {
    let (state, _tmp) = test_state().await;

    for i in 0..25 {
        let app = build_app(state.clone());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "health check #{i} failed");
    }
}
