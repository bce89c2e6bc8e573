// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/businesses*` — owner-scoped business profile CRUD and a connection
//! status helper.

use crate::auth::Principal;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_core::BusinessStatus;
use agp_error::{AgpError, ErrorCode};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/businesses", get(list_businesses).post(create_business))
        .route(
            "/businesses/{id}",
            get(get_business).patch(update_business).delete(delete_business),
        )
        .route("/businesses/{id}/connection", get(connection_status))
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

async fn owned_or_not_found(
    state: &AppState,
    id: &str,
    owner_id: &str,
    request_id: &str,
) -> Result<agp_core::Business, ApiError> {
    let business = state
        .business_store
        .get(id)
        .await
        .map_err(|e| ApiError::new(e, request_id.to_string()))?
        .ok_or_else(|| {
            ApiError::new(
                AgpError::new(ErrorCode::BusinessNotFound, "no business with this id"),
                request_id.to_string(),
            )
        })?;
    if business.owner_id != owner_id {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::Forbidden, "business is not owned by this principal"),
            request_id.to_string(),
        ));
    }
    Ok(business)
}

#[derive(Debug, Deserialize)]
struct CreateBusinessRequest {
    name: String,
    platform: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    preferences: Option<serde_json::Value>,
}

async fn create_business(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<CreateBusinessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let business = state
        .business_store
        .create(
            &principal.id,
            &req.name,
            &req.platform,
            req.location,
            req.description,
            req.category,
            req.preferences,
        )
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(business))
}

async fn list_businesses(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let businesses = state
        .business_store
        .list_for_owner(&principal.id)
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(json!({ "businesses": businesses })))
}

async fn get_business(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(business_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let business = owned_or_not_found(&state, &business_id, &principal.id, &request_id).await?;
    Ok(Json(business))
}

#[derive(Debug, Deserialize)]
struct UpdateBusinessRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    preferences: Option<serde_json::Value>,
}

async fn update_business(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(business_id): Path<String>,
    Json(req): Json<UpdateBusinessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    owned_or_not_found(&state, &business_id, &principal.id, &request_id).await?;
    state
        .business_store
        .update(
            &business_id,
            &principal.id,
            req.name,
            req.location,
            req.description,
            req.category,
            req.preferences,
        )
        .await
        .map_err(|e| ApiError::new(e, request_id))?;
    Ok(Json(json!({ "updated": true })))
}

async fn delete_business(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(business_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    owned_or_not_found(&state, &business_id, &principal.id, &request_id).await?;
    state
        .business_store
        .set_status(&business_id, &principal.id, BusinessStatus::Deleted)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;
    Ok(Json(json!({ "deleted": true })))
}

/// Whether the caller has an active credential for this business's
/// platform, so the UI can offer "connect" vs. "manage" affordances
/// without round-tripping the vault directly.
async fn connection_status(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(business_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let business = owned_or_not_found(&state, &business_id, &principal.id, &request_id).await?;
    let connected = state
        .vault
        .has_credential(&principal.id, &business.platform)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;
    Ok(Json(json!({ "platform": business.platform, "connected": connected })))
}
