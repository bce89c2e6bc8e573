// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/connect/services`, `/connect/:service`, `/connect/:service/callback` —
//! the OAuth authorize-redirect/callback round trip that connects a
//! caller's credential for an adapter's configured `oauth` service .
//!
//! The provider-side callback *UI* is explicitly out of scope;
//! this module owns only the redirect construction, CSRF `state` token
//! bookkeeping (`oauth_state` table), and the authorization-code exchange
//! that lands a [`agp_core::CredentialPayload`] in the vault.

use crate::auth::Principal;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_core::manifest::TokenContentType;
use agp_core::{AuthType, CredentialPayload};
use agp_error::{AgpError, ErrorCode};
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// How long a `state` token issued by `/connect/:service` remains valid.
const STATE_TTL_MINUTES: i64 = 10;

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/connect/services", get(list_services))
        .route("/connect/{service}", get(authorize))
        .route("/connect/{service}/callback", get(callback))
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

async fn list_services(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services: Vec<_> = state
        .registry
        .list_oauth_adapters()
        .into_iter()
        .filter_map(|entry| {
            let manifest = entry.adapter.manifest();
            manifest.auth.oauth.as_ref().map(|oauth| {
                json!({
                    "platform": entry.adapter.platform(),
                    "service": oauth.oauth_service,
                    "scopes": manifest.auth.scopes,
                })
            })
        })
        .collect();
    axum::Json(json!({ "services": services }))
}

async fn authorize(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let entry = state.registry.get_oauth_adapter(&service).ok_or_else(|| {
        ApiError::new(
            AgpError::new(ErrorCode::AdapterNotFound, "no oauth-capable adapter for this service"),
            request_id.clone(),
        )
    })?;
    let manifest = entry.adapter.manifest().clone();
    let oauth = manifest.auth.oauth.clone().ok_or_else(|| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "oauth adapter manifest is missing its oauth block"),
            request_id.clone(),
        )
    })?;

    let app_creds = state
        .app_credentials
        .retrieve(&oauth.oauth_service)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let token = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO oauth_state (state, user_id, service, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&token)
    .bind(&principal.id)
    .bind(&service)
    .bind(now.to_rfc3339())
    .bind((now + Duration::minutes(STATE_TTL_MINUTES)).to_rfc3339())
    .execute(&state.pool)
    .await
    .map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "failed to persist oauth state").with_source(e),
            request_id.clone(),
        )
    })?;

    let redirect_uri = format!("{}/connect/{service}/callback", state.config.public_base_url);
    let mut url = reqwest::Url::parse(&oauth.authorization_url).map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "adapter authorization_url is not a valid url").with_source(e),
            request_id.clone(),
        )
    })?;
    {
        let mut qs = url.query_pairs_mut();
        qs.append_pair("client_id", &app_creds.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("state", &token);
        if !manifest.auth.scopes.is_empty() {
            qs.append_pair("scope", &manifest.auth.scopes.join(" "));
        }
        for (key, value) in &oauth.extra_auth_params {
            qs.append_pair(key, value);
        }
    }

    Ok(Redirect::to(url.as_str()))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    Path(service): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<axum::response::Response, ApiError> {
    let request_id = rid(id);

    if let Some(err) = query.error {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::AdapterOperation, format!("oauth provider returned an error: {err}")),
            request_id,
        ));
    }
    let code = query.code.ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::Validation, "callback is missing the authorization code"), request_id.clone())
    })?;
    let state_token = query.state.ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::Validation, "callback is missing the state token"), request_id.clone())
    })?;

    let row = sqlx::query("SELECT user_id, service, expires_at FROM oauth_state WHERE state = ?1")
        .bind(&state_token)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            ApiError::new(
                AgpError::new(ErrorCode::Internal, "failed to look up oauth state").with_source(e),
                request_id.clone(),
            )
        })?
        .ok_or_else(|| {
            ApiError::new(AgpError::new(ErrorCode::Validation, "unknown or already-consumed oauth state"), request_id.clone())
        })?;

    // Consume the state token immediately: one authorize round trip, one
    // callback, regardless of the exchange's outcome below.
    sqlx::query("DELETE FROM oauth_state WHERE state = ?1")
        .bind(&state_token)
        .execute(&state.pool)
        .await
        .ok();

    use sqlx::Row;
    let bound_user_id: String = row.get("user_id");
    let bound_service: String = row.get("service");
    let expires_at: String = row.get("expires_at");
    if bound_service != service {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::Validation, "oauth state does not match this callback's service"),
            request_id,
        ));
    }
    let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
        .map(|dt| dt.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(ApiError::new(AgpError::new(ErrorCode::Validation, "oauth state token has expired"), request_id));
    }

    let entry = state.registry.get_oauth_adapter(&service).ok_or_else(|| {
        ApiError::new(
            AgpError::new(ErrorCode::AdapterNotFound, "no oauth-capable adapter for this service"),
            request_id.clone(),
        )
    })?;
    let manifest = entry.adapter.manifest().clone();
    let oauth = manifest.auth.oauth.clone().ok_or_else(|| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "oauth adapter manifest is missing its oauth block"),
            request_id.clone(),
        )
    })?;
    let app_creds = state
        .app_credentials
        .retrieve(&oauth.oauth_service)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let redirect_uri = format!("{}/connect/{service}/callback", state.config.public_base_url);
    let client = reqwest::Client::new();
    let request = client.post(&oauth.token_url);
    let request = match oauth.token_content_type {
        TokenContentType::Form => request.form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", app_creds.client_id.as_str()),
            ("client_secret", app_creds.client_secret.as_str()),
        ]),
        TokenContentType::Json => request.json(&json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_uri,
            "client_id": app_creds.client_id,
            "client_secret": app_creds.client_secret,
        })),
    };

    let response = request.send().await.map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::AdapterOperation, "oauth token exchange request failed").with_source(e),
            request_id.clone(),
        )
    })?;
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::AdapterOperation, format!("oauth token endpoint returned {status}")),
            request_id,
        ));
    }
    let parsed: TokenResponse = serde_json::from_str(&body_text).map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::AdapterOperation, "oauth token response is not valid JSON").with_source(e),
            request_id.clone(),
        )
    })?;

    let scopes: Vec<String> = parsed
        .scope
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let payload = CredentialPayload {
        access_token: Some(parsed.access_token),
        refresh_token: parsed.refresh_token,
        token_type: parsed.token_type,
        expires_in: parsed.expires_in,
        ..Default::default()
    };

    state
        .vault
        .store_credential(&bound_user_id, &service, AuthType::Oauth2, &payload, Some(scopes))
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    state
        .audit
        .log_audit(Some(&bound_user_id), Some(&service), "credential_stored", None, None, None)
        .await;

    Ok(Html(format!(
        "<!doctype html><html><body><p>Connected {service} successfully. You may close this window.</p></body></html>"
    ))
    .into_response())
}
