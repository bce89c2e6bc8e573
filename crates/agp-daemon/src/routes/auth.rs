// SPDX-License-Identifier: MIT OR Apache-2.0
//! `/auth*` — browser session sign-in via Google or GitHub OAuth .
//!
//! This mirrors the `/connect/:service` round trip in `routes::connect`
//! (CSRF `state` row in `oauth_state`, authorization-code exchange) but
//! authenticates the *caller of this gateway*, not a business's upstream
//! credential: a successful callback upserts a `users` row by verified
//! email and mints an `agp_session` cookie rather than a vault entry.

use crate::auth::Principal;
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::AppState;
use agp_error::{AgpError, ErrorCode};
use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

const STATE_TTL_MINUTES: i64 = 10;
const SESSION_TTL_DAYS: i64 = 30;

struct LoginProvider {
    authorize_url: &'static str,
    token_url: &'static str,
    userinfo_url: &'static str,
    scope: &'static str,
}

fn provider(name: &str) -> Option<LoginProvider> {
    match name {
        "google" => Some(LoginProvider {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth",
            token_url: "https://oauth2.googleapis.com/token",
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo",
            scope: "openid email",
        }),
        "github" => Some(LoginProvider {
            authorize_url: "https://github.com/login/oauth/authorize",
            token_url: "https://github.com/login/oauth/access_token",
            userinfo_url: "https://api.github.com/user",
            scope: "read:user user:email",
        }),
        _ => None,
    }
}

#[must_use]
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/{provider}", get(authorize))
        .route("/auth/{provider}/callback", get(callback))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

fn rid(id: Option<RequestId>) -> String {
    id.map(|r| r.as_string()).unwrap_or_default()
}

async fn authorize(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    Path(provider_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    let login = provider(&provider_name).ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::Validation, "unsupported login provider"), request_id.clone())
    })?;
    let service_id = format!("login_{provider_name}");
    let app_creds = state
        .app_credentials
        .retrieve(&service_id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;

    let token = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO oauth_state (state, user_id, service, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(&token)
    .bind("")
    .bind(&service_id)
    .bind(now.to_rfc3339())
    .bind((now + Duration::minutes(STATE_TTL_MINUTES)).to_rfc3339())
    .execute(&state.pool)
    .await
    .map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "failed to persist login state").with_source(e),
            request_id.clone(),
        )
    })?;

    let redirect_uri = format!("{}/auth/{provider_name}/callback", state.config.public_base_url);
    let mut url = reqwest::Url::parse(login.authorize_url).map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::Internal, "login provider authorize url is invalid").with_source(e),
            request_id.clone(),
        )
    })?;
    url.query_pairs_mut()
        .append_pair("client_id", &app_creds.client_id)
        .append_pair("redirect_uri", &redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", login.scope)
        .append_pair("state", &token);

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
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

async fn callback(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    Path(provider_name): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<axum::response::Response, ApiError> {
    let request_id = rid(id);
    let login = provider(&provider_name).ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::Validation, "unsupported login provider"), request_id.clone())
    })?;

    if let Some(err) = query.error {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::AuthInvalid, format!("login provider returned an error: {err}")),
            request_id,
        ));
    }
    let code = query.code.ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::Validation, "callback is missing the authorization code"), request_id.clone())
    })?;
    let state_token = query.state.ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::Validation, "callback is missing the state token"), request_id.clone())
    })?;

    let service_id = format!("login_{provider_name}");
    let row = sqlx::query("SELECT service, expires_at FROM oauth_state WHERE state = ?1")
        .bind(&state_token)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| {
            ApiError::new(AgpError::new(ErrorCode::Internal, "failed to look up login state").with_source(e), request_id.clone())
        })?
        .ok_or_else(|| {
            ApiError::new(AgpError::new(ErrorCode::Validation, "unknown or already-consumed login state"), request_id.clone())
        })?;
    sqlx::query("DELETE FROM oauth_state WHERE state = ?1")
        .bind(&state_token)
        .execute(&state.pool)
        .await
        .ok();

    let bound_service: String = row.get("service");
    let expires_at: String = row.get("expires_at");
    if bound_service != service_id {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::Validation, "login state does not match this callback's provider"),
            request_id,
        ));
    }
    let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
        .map(|dt| dt.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        return Err(ApiError::new(AgpError::new(ErrorCode::Validation, "login state token has expired"), request_id));
    }

    let app_creds = state
        .app_credentials
        .retrieve(&service_id)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    let redirect_uri = format!("{}/auth/{provider_name}/callback", state.config.public_base_url);

    let client = reqwest::Client::new();
    let token_response = client
        .post(login.token_url)
        .header(axum::http::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("client_id", app_creds.client_id.as_str()),
            ("client_secret", app_creds.client_secret.as_str()),
        ])
        .send()
        .await
        .map_err(|e| {
            ApiError::new(AgpError::new(ErrorCode::AdapterOperation, "login token exchange failed").with_source(e), request_id.clone())
        })?;
    if !token_response.status().is_success() {
        return Err(ApiError::new(
            AgpError::new(ErrorCode::AuthInvalid, "login provider rejected the authorization code"),
            request_id,
        ));
    }
    let token_body = token_response.text().await.unwrap_or_default();
    let token: TokenResponse = serde_json::from_str(&token_body).map_err(|e| {
        ApiError::new(
            AgpError::new(ErrorCode::AdapterOperation, "login token response is not valid JSON").with_source(e),
            request_id.clone(),
        )
    })?;

    let userinfo = client
        .get(login.userinfo_url)
        .bearer_auth(&token.access_token)
        .header(axum::http::header::USER_AGENT, "agp-gateway")
        .send()
        .await
        .map_err(|e| {
            ApiError::new(AgpError::new(ErrorCode::AdapterOperation, "failed to fetch login provider profile").with_source(e), request_id.clone())
        })?
        .json::<UserInfo>()
        .await
        .map_err(|e| {
            ApiError::new(AgpError::new(ErrorCode::AdapterOperation, "login provider profile response is not valid JSON").with_source(e), request_id.clone())
        })?;
    let email = userinfo.email.ok_or_else(|| {
        ApiError::new(AgpError::new(ErrorCode::AuthInvalid, "login provider did not return a verified email"), request_id.clone())
    })?;

    let user_id = upsert_user(&state, &email)
        .await
        .map_err(|e| ApiError::new(e, request_id.clone()))?;
    let session_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query("INSERT INTO sessions (id, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&session_id)
        .bind(&user_id)
        .bind((now + Duration::days(SESSION_TTL_DAYS)).to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&state.pool)
        .await
        .map_err(|e| {
            ApiError::new(AgpError::new(ErrorCode::Internal, "failed to create session").with_source(e), request_id.clone())
        })?;

    state.audit.log_audit(Some(&user_id), None, "session_created", None, None, None).await;

    let cookie = format!(
        "agp_session={session_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_TTL_DAYS * 86_400
    );
    let mut response = Html("<!doctype html><html><body><p>Signed in. You may close this window.</p></body></html>").into_response();
    response.headers_mut().insert(
        SET_COOKIE,
        cookie.parse().map_err(|e: axum::http::header::InvalidHeaderValue| {
            ApiError::new(AgpError::new(ErrorCode::Internal, "failed to build session cookie").with_source(e), request_id.clone())
        })?,
    );
    Ok(response)
}

async fn upsert_user(state: &AppState, email: &str) -> Result<String, AgpError> {
    if let Some(row) = sqlx::query("SELECT id FROM users WHERE email = ?1")
        .bind(email)
        .fetch_optional(&state.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to look up user").with_source(e))?
    {
        return Ok(row.get("id"));
    }
    let id = Uuid::new_v4().to_string();
    let is_admin = state.config.is_admin(email);
    sqlx::query("INSERT INTO users (id, email, is_admin, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&id)
        .bind(email)
        .bind(is_admin)
        .bind(Utc::now().to_rfc3339())
        .execute(&state.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to create user").with_source(e))?;
    Ok(id)
}

async fn logout(
    State(state): State<Arc<AppState>>,
    id: Option<RequestId>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = rid(id);
    sqlx::query("DELETE FROM sessions WHERE user_id = ?1")
        .bind(&principal.id)
        .execute(&state.pool)
        .await
        .map_err(|e| {
            ApiError::new(AgpError::new(ErrorCode::Internal, "failed to clear sessions").with_source(e), request_id.clone())
        })?;
    let mut response = axum::Json(json!({ "loggedOut": true })).into_response();
    response
        .headers_mut()
        .insert(SET_COOKIE, "agp_session=; Path=/; HttpOnly; Max-Age=0".parse().unwrap());
    Ok(response)
}

async fn me(principal: Principal) -> impl IntoResponse {
    axum::Json(json!({ "id": principal.id, "isAdmin": principal.is_admin }))
}
