// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared test scaffolding: an in-memory `AppState` plus a helper to mint
//! an API key directly against the database (the same row shape
//! `POST /keys` would insert, without requiring an already-authenticated
//! caller to bootstrap one).

use agp_config::ServerConfig;
use agp_daemon::{build_state, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

/// Build a daemon `AppState` over a fresh in-memory database and scratch
/// bundled/runtime adapter directories.
pub async fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        database_url: "sqlite::memory:".to_string(),
        bundled_dir: tmp.path().join("bundled"),
        runtime_dir: tmp.path().join("runtime"),
        ..ServerConfig::default()
    };
    let state = build_state(config).await.expect("build_state");
    (state, tmp)
}

/// Insert an `api_keys` row for `owner_id` and return the raw bearer token.
pub async fn mint_api_key(state: &AppState, owner_id: &str) -> String {
    let raw = format!("agp_test_{owner_id}_{}", uuid::Uuid::new_v4());
    let key_hash = agp_daemon::auth::hash_api_key(&raw);
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO api_keys (id, owner_id, key_hash, label, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&id)
    .bind(owner_id)
    .bind(&key_hash)
    .bind("test key")
    .bind(&now)
    .execute(&state.pool)
    .await
    .expect("insert api key");
    raw
}

/// `GET`/`DELETE` a path with a bearer token and no body, returning
/// `(status, json)`.
pub async fn bearer_get(app: axum::Router, uri: &str, token: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    to_json(resp).await
}

/// `POST` a JSON body with a bearer token, returning `(status, json)`.
pub async fn bearer_post(
    app: axum::Router,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    to_json(resp).await
}

/// Plain unauthenticated `GET`, returning `(status, json)`.
pub async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    to_json(resp).await
}

async fn to_json(resp: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}
