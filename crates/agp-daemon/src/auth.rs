// SPDX-License-Identifier: MIT OR Apache-2.0
//! Principal resolution: API keys and browser sessions.
//!
//! Two credential shapes reach the daemon: a long-lived API key presented
//! as `Authorization: Bearer <key>` (the agent-facing path, matched
//! against `api_keys.key_hash`), and a short-lived session id presented as
//! an `agp_session` cookie (the human admin-UI path, matched against
//! `sessions` joined to `users`). Both resolve to the same [`Principal`]
//! shape so route handlers never need to know which one was used.

use crate::error::ApiError;
use crate::middleware::RequestId;
use agp_config::ServerConfig;
use agp_error::{AgpError, ErrorCode};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

/// A resolved caller: the id every owner-scoped row is keyed by, plus
/// whether the caller should be treated as an administrator.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Principal id (`api_keys.owner_id`, or the session's `users.id`).
    pub id: String,
    /// Whether this caller's email is in [`ServerConfig::admin_emails`], or
    /// the principal id is the well-known [`agp_gateway::ADMIN_PRINCIPAL`].
    pub is_admin: bool,
}

/// Hash an API key the same way stored `api_keys.key_hash` rows are
/// produced, so a lookup is a straight equality match.
#[must_use]
pub fn hash_api_key(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn session_cookie(parts: &Parts) -> Option<String> {
    let raw = parts.headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let pair = pair.trim();
        pair.strip_prefix("agp_session=").map(str::to_string())
    })
}

async fn resolve_api_key(pool: &SqlitePool, config: &ServerConfig, raw_key: &str) -> Result<Principal, AgpError> {
    let key_hash = hash_api_key(raw_key);
    let row = sqlx::query(
        "SELECT owner_id FROM api_keys WHERE key_hash = ?1 AND revoked_at IS NULL",
    )
    .bind(&key_hash)
    .fetch_optional(pool)
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to resolve api key").with_source(e))?
    .ok_or_else(|| AgpError::new(ErrorCode::AuthInvalid, "api key is invalid or revoked"))?;

    let owner_id: String = row.get("owner_id");
    let is_admin = is_admin_principal(pool, config, &owner_id).await?;
    Ok(Principal { id: owner_id, is_admin })
}

async fn resolve_session(pool: &SqlitePool, config: &ServerConfig, session_id: &str) -> Result<Principal, AgpError> {
    let row = sqlx::query(
        "SELECT s.user_id AS user_id, s.expires_at AS expires_at, u.email AS email
         FROM sessions s JOIN users u ON u.id = s.user_id
         WHERE s.id = ?1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to resolve session").with_source(e))?
    .ok_or_else(|| AgpError::new(ErrorCode::AuthInvalid, "session is invalid"))?;

    let expires_at: String = row.get("expires_at");
    let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
        .map(|dt| dt.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(AgpError::new(ErrorCode::AuthInvalid, "session has expired"));
    }

    let user_id: String = row.get("user_id");
    let email: String = row.get("email");
    Ok(Principal {
        id: user_id,
        is_admin: config.is_admin(&email),
    })
}

/// Returns `true` if `owner_id` should be treated as an admin: either it is
/// the well-known admin principal, or it resolves to a `users` row whose
/// email is in [`ServerConfig::admin_emails`].
async fn is_admin_principal(pool: &SqlitePool, config: &ServerConfig, owner_id: &str) -> Result<bool, AgpError> {
    if owner_id == agp_gateway::ADMIN_PRINCIPAL {
        return Ok(true);
    }
    let row = sqlx::query("SELECT email FROM users WHERE id = ?1")
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to resolve principal email").with_source(e))?;
    Ok(row.is_some_and(|r| config.is_admin(&r.get::<String, _>("email"))))
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
    ServerConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions()
            .get::<RequestId>()
            .map(RequestId::as_string)
            .unwrap_or_default();
        let pool = SqlitePool::from_ref(state);
        let config = ServerConfig::from_ref(state);

        if let Some(token) = bearer_token(parts) {
            return resolve_api_key(&pool, &config, token)
                .await
                .map_err(|e| ApiError::new(e, request_id));
        }
        if let Some(session_id) = session_cookie(parts) {
            return resolve_session(&pool, &config, &session_id)
                .await
                .map_err(|e| ApiError::new(e, request_id));
        }
        Err(ApiError::new(
            AgpError::new(ErrorCode::AuthMissing, "no api key or session credential presented"),
            request_id,
        ))
    }
}

/// Like [`Principal`], but rejects with `403 FORBIDDEN` unless the caller
/// is an admin. Used by the admin-only adapter-lifecycle and app-credential
/// routes.
#[derive(Debug, Clone)]
pub struct AdminPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AdminPrincipal
where
    S: Send + Sync,
    SqlitePool: FromRef<S>,
    ServerConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions()
            .get::<RequestId>()
            .map(RequestId::as_string)
            .unwrap_or_default();
        let principal = Principal::from_request_parts(parts, state).await?;
        if !principal.is_admin {
            return Err(ApiError::new(
                AgpError::new(ErrorCode::Forbidden, "admin privileges required"),
                request_id,
            ));
        }
        Ok(Self(principal))
    }
}
