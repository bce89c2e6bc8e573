// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/adapters*` — registry lifecycle management and the generation job
//! queue.
//!
//! Upload validates a descriptor with [`DescriptorRunner::from_json`]
//! before it ever touches disk; every other transition here is a thin
//! wrapper over [`agp_registry::lifecycle`].

use crate::auth::{AdminPrincipal, Principal};
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_adapter::descriptor::DescriptorRunner;
use agp_error::{AgpError, ErrorCode};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/adapters", get(list_adapters).post(upload_adapter))
        .route("/adapters/{platform}/submit", post(submit_adapter))
        .route("/adapters/{platform}/withdraw", post(withdraw_adapter))
        .route("/adapters/{platform}/reject", post(reject_adapter))
        .route("/adapters/{platform}/promote", post(promote_adapter))
        .route("/adapters/{platform}/demote", post(demote_adapter))
        .route("/adapters/{platform}/archive", post(archive_adapter))
        .route("/adapters/{platform}/restore", post(restore_adapter))
        .route("/adapters/{platform}", axum::routing::delete(delete_adapter))
        .route("/adapters/jobs", get(list_jobs).post(create_job))
        .route("/adapters/jobs/{id}", get(get_job))
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

fn hash_source(source: &str) -> String {
    Sha256::digest(source.as_bytes()).iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Deserialize)]
struct UploadAdapterRequest {
    descriptor: serde_json::Value,
    #[serde(default)]
    version: Option<String>,
}

/// Validate an uploaded descriptor and create (or replace) the caller's
/// sandbox record for its platform.
async fn upload_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<UploadAdapterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let source = serde_json::to_string(&req.descriptor).map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Validation, "descriptor is not serializable JSON").with_source(e),
            request_id.clone(),
        )
    })?;
    let runner = DescriptorRunner::from_json(&source).map_err(|e| ApiError::new(e, request_id.clone()))?;
    let platform = runner.descriptor().manifest.platform.clone();

    let relative = format!("{platform}-{}.json", principal.id);
    let path = state
        .registry
        .runtime_path(&relative)
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ApiError::new(
                AgpError::new(ErrorCode::Internal, "failed to create runtime directory").with_source(e),
                request_id.clone(),
            )
        })?;
    }
    std::fs::write(&path, &source).map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "failed to write uploaded adapter descriptor").with_source(e),
            request_id.clone(),
        )
    })?;

    upsert_sandbox_row(&state, &platform, &principal.id, &path.to_string_lossy(), &source, req.version.as_deref())
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    state
        .registry
        .hot_load(&platform, agp_registry::Scope::Sandbox(principal.id.clone()), &path)
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    state
        .audit
        .log_audit(Some(&principal.id), Some(&platform), "adapter_uploaded", None, None, None)
        .await;

    Ok(Json(json!({ "platform": platform, "status": "sandbox" })))
}

async fn upsert_sandbox_row(
    state: &AppState,
    platform: &str,
    owner_id: &str,
    file_path: &str,
    source: &str,
    version: Option<&str>,
) -> Result<(), AgpError> {
    let existing = sqlx::query("SELECT id FROM adapters WHERE platform = ?1 AND owner_id = ?2")
        .bind(platform)
        .bind(owner_id)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to look up sandbox adapter row").with_source(e))?;

    let now = chrono::Utc::now().to_rfc3339();
    let hash = hash_source(source);

    if let Some(row) = existing {
        let id: String = row.get("id");
        sqlx::query(
            "UPDATE adapters SET status = 'sandbox', file_path = ?1, source_code = ?2, source_hash = ?3,
                version = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .bind(file_path)
        .bind(source)
        .bind(&hash)
        .bind(version)
        .bind(&now)
        .bind(&id)
        .execute(&state.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update sandbox adapter row").with_source(e))?;
    } else {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO adapters
                (id, platform, owner_id, status, file_path, source_code, source_hash, version,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, 'sandbox', ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(&id)
        .bind(platform)
        .bind(owner_id)
        .bind(file_path)
        .bind(source)
        .bind(&hash)
        .bind(version)
        .bind(&now)
        .execute(&state.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert sandbox adapter row").with_source(e))?;
    }
    Ok(())
}

async fn list_adapters(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let rows = sqlx::query(
        "SELECT platform, owner_id, status, version, created_at, updated_at FROM adapters
         WHERE owner_id = ?1 OR status = 'public' ORDER BY updated_at DESC",
    )
    .bind(&principal.id)
    .fetch_all(&state.pool)
    .await
    .map_err(|e| ApiError::new(AgpError::new(ErrorCode::Internal, "failed to list adapters").with_source(e), rid(id)))?;

    let adapters: Vec<_> = rows
        .into_iter()
        .map(|row| {
            json!({
                "platform": row.get::<String, _>("platform"),
                "ownerId": row.get::<String, _>("owner_id"),
                "status": row.get::<String, _>("status"),
                "version": row.get::<Option<String>, _>("version"),
                "createdAt": row.get::<String, _>("created_at"),
                "updatedAt": row.get::<String, _>("updated_at"),
            })
        })
        .collect();
    Ok(Json(json!({ "adapters": adapters })))
}

#[derive(Debug, Deserialize, Default)]
struct WithMessage {
    #[serde(default)]
    message: Option<String>,
}

async fn submit_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(platform): Path<String>,
    body: Option<Json<WithMessage>>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let message = body.and_then(|b| b.0.message);
    agp_registry::lifecycle::submit(&state.registry, &platform, &principal.id, message)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&principal.id), Some(&platform), "adapter_submitted", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "review" })))
}

async fn withdraw_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(platform): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::withdraw(&state.registry, &platform, &principal.id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&principal.id), Some(&platform), "adapter_withdrawn", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "sandbox" })))
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    owner_id: String,
    feedback: String,
}

async fn reject_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    admin: AdminPrincipal,
    Path(platform): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::reject(&state.registry, &platform, &req.owner_id, req.feedback)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&admin.0.id), Some(&platform), "adapter_rejected", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "sandbox" })))
}

#[derive(Debug, Deserialize)]
struct PromoteRequest {
    owner_id: String,
}

async fn promote_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    admin: AdminPrincipal,
    Path(platform): Path<String>,
    Json(req): Json<PromoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::promote(&state.registry, &platform, &req.owner_id, &admin.0.id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&admin.0.id), Some(&platform), "adapter_promoted", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "public" })))
}

async fn demote_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    admin: AdminPrincipal,
    Path(platform): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::demote(&state.registry, &platform)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&admin.0.id), Some(&platform), "adapter_demoted", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "sandbox" })))
}

async fn archive_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(platform): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::archive(&state.registry, &platform, &principal.id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&principal.id), Some(&platform), "adapter_archived", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "archived" })))
}

async fn restore_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(platform): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::restore(&state.registry, &platform, &principal.id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&principal.id), Some(&platform), "adapter_restored", None, None, None).await;
    Ok(Json(json!({ "platform": platform, "status": "sandbox" })))
}

async fn delete_adapter(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(platform): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    agp_registry::lifecycle::delete_sandbox(&state.registry, &platform, &principal.id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state.audit.log_audit(Some(&principal.id), Some(&platform), "adapter_deleted", None, None, None).await;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    platform: String,
    #[serde(default)]
    docs_url: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let job = state
        .job_queue
        .create_job(
            &req.platform,
            req.docs_url,
            req.provider.or_else(|| state.config.generator_provider.clone()),
            req.model.or_else(|| state.config.generator_model.clone()),
            Some(principal.id.clone()),
        )
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    state
        .audit
        .log_audit(Some(&principal.id), Some(&req.platform), "generation_job_created", None, None, None)
        .await;
    Ok((axum::http::StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize, Default)]
struct ListJobsQuery {
    #[serde(default)]
    limit: Option<i64>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let jobs = state
        .job_queue
        .list_jobs(Some(&principal.id), limit, None)
        .await
        .map_err(|e| ApiError::new(e, rid(id)))?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let row = sqlx::query(
        "SELECT id, platform, docs_url, provider, model, status, owner_key_id, logs, result, error,
            created_at, started_at, completed_at
         FROM generation_jobs WHERE id = ?1",
    )
    .bind(job_id.to_string())
    .fetch_optional(&state.pool)
    .await
    .map_err(|e| ApiError::new(AgpError::new(ErrorCode::Internal, "failed to load job").with_source(e), request_id.clone()))?
    .ok_or_else(|| ApiError::new(AgpError::new(ErrorCode::Validation, "no such generation job"), request_id.clone()))?;

    let owner_key_id: Option<String> = row.get("owner_key_id");
    if owner_key_id.as_deref() != Some(principal.id.as_str()) && !principal.is_admin {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::Forbidden, "job is not owned by this principal"),
            request_id,
        ));
    }

    let logs_raw: String = row.get("logs");
    let logs: Vec<String> = serde_json::from_str(&logs_raw).unwrap_or_default();
    let result_raw: Option<String> = row.get("result");
    let result: Option<serde_json::Value> = result_raw.and_then(|r| serde_json::from_str(&r).ok());

    Ok(Json(json!({
        "id": row.get::<String, _>("id"),
        "platform": row.get::<String, _>("platform"),
        "docsUrl": row.get::<Option<String>, _>("docs_url"),
        "provider": row.get::<Option<String>, _>("provider"),
        "model": row.get::<Option<String>, _>("model"),
        "status": row.get::<String, _>("status"),
        "ownerKeyId": owner_key_id,
        "logs": logs,
        "result": result,
        "error": row.get::<Option<String>, _>("error"),
        "createdAt": row.get::<String, _>("created_at"),
        "startedAt": row.get::<Option<String>, _>("started_at"),
        "completedAt": row.get::<Option<String>, _>("completed_at"),
    })))
}
