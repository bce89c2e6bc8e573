// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end HTTP coverage over businesses, credentials, and the
//! gateway's error paths (no live network: every scenario here either
//! fails before an adapter is invoked, or only calls `prepare`, which
//! never reaches an adapter).

mod support;

use agp_daemon::build_app;
use serde_json::json;
use support::{bearer_get, bearer_post, get_json, mint_api_key, test_state};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// 1. Authentication is required on owner-scoped routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn businesses_without_credentials_is_auth_missing() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let (status, json) = get_json(app, "/businesses").await;

    assert_eq!(status, 401);
    assert_eq!(json["code"], "AUTH_MISSING");
    assert!(json.get("requestId").is_some());
}

#[tokio::test]
async fn invalid_bearer_token_is_auth_invalid() {
    let (state, _tmp) = test_state().await;
    let app = build_app(state);

    let (status, json) = bearer_get(app, "/businesses", "not-a-real-key").await;

    assert_eq!(status, 401);
    assert_eq!(json["code"], "AUTH_INVALID");
}

// ---------------------------------------------------------------------------
// 2. Business CRUD round-trip, scoped to the creating owner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_then_list_then_get_business() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;

    let app = build_app(state.clone());
    let (status, created) = bearer_post(
        app,
        "/businesses",
        &token,
        json!({"name": "Alice's Cafe", "platform": "stripe"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(created["owner_id"], "alice");
    assert_eq!(created["platform"], "stripe");
    let business_id = created["id"].as_str().unwrap().to_string();

    let app = build_app(state.clone());
    let (status, listed) = bearer_get(app, "/businesses", &token).await;
    assert_eq!(status, 200);
    let businesses = listed["businesses"].as_array().unwrap();
    assert!(businesses.iter().any(|b| b["id"] == business_id));

    let app = build_app(state);
    let (status, fetched) = bearer_get(app, &format!("/businesses/{business_id}"), &token).await;
    assert_eq!(status, 200);
    assert_eq!(fetched["id"], business_id);
}

#[tokio::test]
async fn business_is_not_visible_to_a_different_owner() {
    let (state, _tmp) = test_state().await;
    let alice = mint_api_key(&state, "alice").await;
    let bob = mint_api_key(&state, "bob").await;

    let app = build_app(state.clone());
    let (_, created) = bearer_post(
        app,
        "/businesses",
        &alice,
        json!({"name": "Alice's Cafe", "platform": "stripe"}),
    )
    .await;
    let business_id = created["id"].as_str().unwrap().to_string();

    let app = build_app(state);
    let (status, json) = bearer_get(app, &format!("/businesses/{business_id}"), &bob).await;

    assert_eq!(status, 403);
    assert_eq!(json["code"], "FORBIDDEN");
}

#[tokio::test]
async fn getting_an_unknown_business_is_not_found() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;
    let app = build_app(state);

    let (status, json) = bearer_get(app, "/businesses/does-not-exist", &token).await;

    assert_eq!(status, 400);
    assert_eq!(json["code"], "BUSINESS_NOT_FOUND");
}

// ---------------------------------------------------------------------------
// 3. Duplicate business names get a distinct slug suffix
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_business_names_get_distinct_slugs() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;

    let app = build_app(state.clone());
    let (_, first) = bearer_post(app, "/businesses", &token, json!({"name": "Joe's Pizza", "platform": "stripe"})).await;

    let app = build_app(state);
    let (_, second) = bearer_post(app, "/businesses", &token, json!({"name": "Joe's Pizza", "platform": "stripe"})).await;

    assert_ne!(first["id"], second["id"]);
}

// ---------------------------------------------------------------------------
// 4. Credential vault surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_then_list_then_delete_credential() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;

    let app = build_app(state.clone());
    let (status, _) = bearer_post(
        app,
        "/credentials",
        &token,
        json!({
            "service": "stripe",
            "authType": "api_key",
            "api_key": "sk_test_123",
        }),
    )
    .await;
    assert_eq!(status, 200);

    let app = build_app(state.clone());
    let (status, listed) = bearer_get(app, "/credentials", &token).await;
    assert_eq!(status, 200);
    let connections = listed["connections"].as_array().unwrap();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["service_id"], "stripe");

    let app = build_app(state);
    let resp = app
        .oneshot(
            axum::http::Request::builder()
                .method("DELETE")
                .uri("/credentials/stripe")
                .header("authorization", format!("Bearer {token}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ---------------------------------------------------------------------------
// 5. Gateway error paths that never reach an adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discover_against_unknown_business_is_business_not_found() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;
    let app = build_app(state);

    let (status, json) = bearer_post(app, "/agp/discover", &token, json!({"businessId": "nope"})).await;

    assert_eq!(status, 400);
    assert_eq!(json["code"], "BUSINESS_NOT_FOUND");
}

#[tokio::test]
async fn prepare_in_default_confirm_mode_issues_a_token() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;

    let app = build_app(state.clone());
    let (_, business) = bearer_post(app, "/businesses", &token, json!({"name": "Joe's Pizza", "platform": "stripe"})).await;
    let business_id = business["id"].as_str().unwrap().to_string();

    let app = build_app(state);
    let (status, json) = bearer_post(
        app,
        "/agp/execute/prepare",
        &token,
        json!({"businessId": business_id, "input": {}}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(json["confirmationRequired"], true);
    assert!(json.get("token").and_then(|t| t.as_str()).is_some());
}

#[tokio::test]
async fn status_for_someone_elses_transaction_is_forbidden_or_not_found() {
    let (state, _tmp) = test_state().await;
    let token = mint_api_key(&state, "alice").await;
    let app = build_app(state);

    // Never-existed transaction id: the route must not panic or leak
    // another owner's data, it should simply report not found.
    let (status, _) = bearer_get(app, "/agp/status/00000000-0000-0000-0000-000000000000", &token).await;

    assert!(status == 404 || status == 400);
}
