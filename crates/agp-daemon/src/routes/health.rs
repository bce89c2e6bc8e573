// SPDX-License-Identifier: MIT OR Apache-2.0
//! `GET /health` — liveness.

use crate::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let calls = state.telemetry.call_summary();
    let jobs = state.telemetry.job_summary();
    Json(json!({
        "status": "ok",
        "version": agp_core::CONTRACT_VERSION,
        "environment": if state.config.json_logs { "production" } else { "development" },
        "timestamp": Utc::now().to_rfc3339(),
        "calls": calls,
        "jobs": jobs,
    }))
}
