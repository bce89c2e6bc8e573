// SPDX-License-Identifier: MIT OR Apache-2.0
//! `POST /agp/discover`, `/agp/query`, `/agp/execute/prepare`, `/agp/execute`,
//! `GET /agp/status/:id`, `GET /agp/businesses`.

use crate::auth::Principal;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_error::{AgpError, ErrorCode};
use agp_policy::{PolicyDecision, PolicyMode};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agp/discover", post(discover))
        .route("/agp/query", post(query))
        .route("/agp/execute/prepare", post(prepare))
        .route("/agp/execute", post(execute))
        .route("/agp/status/{id}", get(status))
        .route("/agp/businesses", get(public_businesses))
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct BusinessCallRequest {
    #[serde(rename = "businessId")]
    business_id: String,
    #[serde(default)]
    input: Value,
}

fn policy_mode(config: &agp_config::ExecutePolicyMode) -> PolicyMode {
    match config {
        agp_config::ExecutePolicyMode::Permissive => PolicyMode::Permissive,
        agp_config::ExecutePolicyMode::Confirm => PolicyMode::Confirm,
        agp_config::ExecutePolicyMode::Strict => PolicyMode::Strict,
    }
}

async fn discover(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<BusinessCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .gateway
        .discover(&req.business_id, &principal.id)
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(json!({
        "transactionId": result.transaction_id,
        "status": result.status,
        "data": result.data,
    })))
}

async fn query(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<BusinessCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .gateway
        .query(&req.business_id, &principal.id, req.input)
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(json!({
        "transactionId": result.transaction_id,
        "status": result.status,
        "data": result.data,
    })))
}

#[derive(Debug, Serialize)]
struct PrepareResponse {
    #[serde(rename = "confirmationRequired")]
    confirmation_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

async fn prepare(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<BusinessCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let business = state
        .business_store
        .get_active(&req.business_id)
        .await
        .map_err(|e| ApiError::new(e, rid(id.clone())))?
        .ok_or_else(|| {
            ApiError::new(
                AgpError::new(ErrorCode::BusinessNotFound, "no active business with this id"),
                rid(id.clone()),
            )
        })?;

    let mode = policy_mode(&state.config.execute_policy_mode);
    let token = state
        .policy
        .prepare(mode, &business, &business.platform, &req.input);
    let _ = principal; // prepare does not require ownership of the business, only a valid caller

    Ok(Json(PrepareResponse {
        confirmation_required: token.is_some(),
        token,
    }))
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(rename = "businessId")]
    business_id: String,
    #[serde(default)]
    input: Value,
    #[serde(rename = "confirmationToken", default)]
    confirmation_token: Option<String>,
}

async fn execute(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    headers: HeaderMap,
    Json(req): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string());

    if let Some(key) = &idempotency_key {
        if let Some(entry) = state
            .idempotency
            .get(&principal.id, key)
            .await
            .map_err(|e| ApiError::new(e, request_id.clone()))?
        {
            return Ok(replay_response(entry));
        }
    }

    let business = state
        .business_store
        .get_active(&req.business_id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?
        .ok_or_else(|| {
            ApiError::new(
                AgpError::new(ErrorCode::BusinessNotFound, "no active business with this id"),
                request_id.clone(),
            )
        })?;

    let mode = policy_mode(&state.config.execute_policy_mode);
    let decision = state
        .policy
        .evaluate(
            mode,
            &business,
            &business.platform,
            &req.input,
            req.confirmation_token.as_deref(),
        )
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    if let PolicyDecision::RequireConfirmation { token } = decision {
        return Ok(Json(json!({
            "transactionId": Value::Null,
            "status": "confirmation_required",
            "data": { "confirmationRequired": true, "token": token },
        }))
        .into_response());
    }

    let result = state
        .gateway
        .execute(&req.business_id, &principal.id, req.input)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let body = json!({
        "transactionId": result.transaction_id,
        "status": result.status,
        "data": result.data,
    });

    if let Some(key) = &idempotency_key {
        let _ = state.idempotency.put(&principal.id, key, 200, &[], &body).await;
    }

    Ok(Json(body).into_response())
}

fn replay_response(entry: agp_core::IdempotencyEntry) -> axum::response::Response {
    use axum::http::StatusCode;
    let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    (status, Json(entry.body)).into_response()
}

async fn status(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(transaction_id): Path<Uuid>,
) -> Result<axum::response::Response, ApiError> {
    let request_id = rid(id);
    let transaction = state
        .gateway
        .status(transaction_id, &principal.id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    // Transaction lookup has no taxonomy entry for "not found" (unlike the
    // verb endpoints, which surface BUSINESS_NOT_FOUND at 400) —
    // calls for a bare 404 here, so this is the one route that does not
    // route through `ApiError`.
    match transaction {
        Some(transaction) => Ok(Json(transaction).into_response()),
        None => Ok((
            axum::http::StatusCode::NOT_FOUND,
            Json(json!({
                "error": true,
                "message": "no such transaction",
                "code": "NOT_FOUND",
                "requestId": request_id,
            })),
        )
            .into_response()),
    }
}

async fn public_businesses(State(state): State<Arc<AppState>>, id: Option<RequestId>) -> Result<impl IntoResponse, ApiError> {
    let businesses = state
        .business_store
        .list_public()
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(json!({ "businesses": businesses })))
}
