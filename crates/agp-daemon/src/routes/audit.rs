// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET /audit/verify` — re-verify the hash chain.

use crate::auth::AdminPrincipal;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/audit/verify", get(verify))
}

async fn verify(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    _admin: AdminPrincipal,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = id.map(|r| r.as_string()).unwrap_or_default();
    match state.audit.verify().await {
        Ok(()) => Ok(Json(json!({ "valid": true }))),
        Err(e) => Err(ApiError::new(e, request_id)),
    }
}
