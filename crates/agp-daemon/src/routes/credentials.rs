// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/credentials` (manual, non-OAuth credential CRUD) and
//! `/app-credentials/:service` (admin OAuth app credentials).

use crate::auth::{AdminPrincipal, Principal};
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_core::credential::AuthType;
use agp_core::CredentialPayload;
use agp_vault::app_credential::AppCredentialPayload;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/credentials", get(list_connections).post(store_credential))
        .route("/credentials/{service}", delete(delete_credential))
        .route(
            "/app-credentials/{service}",
            post(store_app_credential).delete(delete_app_credential),
        )
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

async fn list_connections(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let connections = state
        .vault
        .list_connections(&principal.id)
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(json!({ "connections": connections })))
}

#[derive(Debug, Deserialize)]
struct StoreCredentialRequest {
    service: String,
    #[serde(rename = "authType")]
    auth_type: AuthType,
    #[serde(flatten)]
    payload: CredentialPayload,
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

async fn store_credential(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<StoreCredentialRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .vault
        .store_credential(&principal.id, &req.service, req.auth_type, &req.payload, req.scopes)
        .await
        .map_err(|e| ApiError::new(e, rid(id.clone())))?;

    state
        .audit
        .log_audit(Some(&principal.id), Some(&req.service), "credential_stored", None, None, None)
        .await;

    Ok(Json(json!({ "stored": true })))
}

async fn delete_credential(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .vault
        .delete_credential(&principal.id, &service)
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;

    state
        .audit
        .log_audit(Some(&principal.id), Some(&service), "credential_deleted", None, None, None)
        .await;

    Ok(Json(json!({ "deleted": true })))
}

async fn store_app_credential(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    admin: AdminPrincipal,
    Path(service): Path<String>,
    Json(payload): Json<AppCredentialPayload>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .app_credentials
        .store(&service, &payload)
        .await
        .map_err(|e| ApiError::new(e, rid(id.clone())))?;

    state
        .audit
        .log_audit(Some(&admin.0.id), Some(&service), "app_credential_stored", None, None, None)
        .await;

    Ok(Json(json!({ "stored": true })))
}

async fn delete_app_credential(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    admin: AdminPrincipal,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    sqlx::query("DELETE FROM app_credentials WHERE service_id = ?1")
        .bind(agp_core::credential::normalize_service_id(&service))
        .execute(&state.pool)
        .await
        .map_err(|e| {
            ApiError::new(
                agp_error::AgpError::new(agp_error::ErrorCode::Internal, "failed to delete app credential")
                    .with_source(e),
                rid(id.clone()),
            )
        })?;

    state
        .audit
        .log_audit(Some(&admin.0.id), Some(&service), "app_credential_deleted", None, None, None)
        .await;

    Ok(Json(json!({ "deleted": true })))
}
