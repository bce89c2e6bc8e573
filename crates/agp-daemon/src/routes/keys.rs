// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/keys*` — long-lived API key management.
//!
//! Raw keys are never stored: only `hash_api_key`'s digest lands in
//! `api_keys.key_hash`, matching the lookup [`crate::auth::Principal`]
//! resolution performs on every authenticated request.

use crate::auth::{hash_api_key, Principal};
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_error::{AgpError, ErrorCode};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{id}", delete(revoke_key))
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

fn generate_raw_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("agp_{}", bytes.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    label: Option<String>,
}

async fn create_key(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<CreateKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let raw_key = generate_raw_key;
    let key_hash = hash_api_key(&raw_key);
    let key_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO api_keys (id, owner_id, key_hash, label, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&key_id)
    .bind(&principal.id)
    .bind(&key_hash)
    .bind(&req.label)
    .bind(&now)
    .execute(&state.pool)
    .await
    .map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "failed to create api key").with_source(e),
            request_id.clone(),
        )
    })?;

    state
        .audit
        .log_audit(Some(&principal.id), None, "api_key_created", None, None, None)
        .await;

    // The raw key is returned exactly once; it cannot be recovered after
    // this response since only its hash is persisted.
    Ok(Json(json!({ "id": key_id, "key": raw_key, "label": req.label })))
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let rows = sqlx::query(
        "SELECT id, label, created_at, revoked_at FROM api_keys WHERE owner_id = ?1 ORDER BY created_at DESC",
    )
    .bind(&principal.id)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "failed to list api keys").with_source(e),
            rid(id),
        )
    })?;

    let keys: Vec<_> = rows
        .into_iter()
        .map(|row| {
            json!({
                "id": row.get::<String, _>("id"),
                "label": row.get::<Option<String>, _>("label"),
                "createdAt": row.get::<String, _>("created_at"),
                "revokedAt": row.get::<Option<String>, _>("revoked_at"),
            })
        })
        .collect();

    Ok(Json(json!({ "keys": keys })))
}

async fn revoke_key(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(key_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2 AND owner_id = ?3 AND revoked_at IS NULL",
    )
    .bind(&now)
    .bind(&key_id)
    .bind(&principal.id)
    .execute(&state.pool)
    .await
    .map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "failed to revoke api key").with_source(e),
            request_id.clone(),
        )
    })?;

    if result.rows_affected() == 0 {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::Validation, "no such active api key for this owner"),
            request_id,
        ));
    }

    state
        .audit
        .log_audit(Some(&principal.id), None, "api_key_revoked", None, None, None)
        .await;

    Ok(Json(json!({ "revoked": true })))
}
