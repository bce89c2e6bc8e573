// SPDX-License-Identifier: MIT OR Apache-2.0

//! Proactive OAuth 2.0 access-token refresh for adapter credentials
//!.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use agp_audit::{sanitize_failure_text, AuditChain};
use agp_core::manifest::{OAuthConfig, TokenContentType};
use agp_core::{AuthType, CredentialPayload};
use agp_error::{AgpError, ErrorCode};
use agp_vault::{AppCredentialStore, CredentialVault};
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Window before expiry at which a refresh is considered due.
const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Cap applied to any provider error body before it is logged.
const SANITIZE_MAX_LEN: usize = 200;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Refresh the OAuth access token for `(user_id, service)` if it is due, or
/// unconditionally if `force` is set.
///
/// Never propagates a failure to the caller: any precondition miss (no
/// credential, wrong auth type, no refresh token, no app credential
/// configured) or transport/provider failure is logged via
/// `tracing::warn!` with the response body sanitized (truncated to 200
/// characters, secret-like substrings redacted) and the call returns
/// `Ok(())`. The only path that can legitimately be retried is the
/// adapter's own 401-retry-once handling.
///
/// # Errors
///
/// This function is designed to never return `Err`; the `Result` is kept
/// for symmetry with the rest of the error-propagating API surface and to
/// allow a future caller-visible failure mode without a signature change.
pub async fn refresh_if_needed(
    vault: &CredentialVault,
    app_credentials: &AppCredentialStore,
    audit: &AuditChain,
    user_id: &str,
    service: &str,
    oauth_config: &OAuthConfig,
    force: bool,
) -> Result<(), AgpError> {
    match try_refresh(vault, app_credentials, audit, user_id, service, oauth_config, force).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let sanitized = sanitize_failure_text(&e.message, SANITIZE_MAX_LEN);
            tracing::warn!(user_id, service, error = %sanitized, "oauth refresh failed");
            Ok(())
        }
    }
}

async fn try_refresh(
    vault: &CredentialVault,
    app_credentials: &AppCredentialStore,
    audit: &AuditChain,
    user_id: &str,
    service: &str,
    oauth_config: &OAuthConfig,
    force: bool,
) -> Result<(), AgpError> {
    let Some((auth_type, expires_at, scopes)) = vault.credential_meta(user_id, service).await? else {
        return Ok(());
    };
    if auth_type != AuthType::Oauth2 {
        return Ok(());
    }

    let now = Utc::now();
    let due = force
        || expires_at.is_some_and(|exp| exp - now <= Duration::minutes(REFRESH_WINDOW_MINUTES));
    if !due {
        return Ok(());
    }

    let payload = match vault.retrieve_credential(user_id, service).await {
        Ok(p) => p,
        Err(e) if e.code == ErrorCode::CredentialNotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let Some(refresh_token) = payload.refresh_token.clone() else {
        return Ok(());
    };

    let app_creds = app_credentials.retrieve(&oauth_config.oauth_service).await?;

    let client = reqwest::Client::new();
    let request = client.post(&oauth_config.token_url);
    let request = match oauth_config.token_content_type {
        TokenContentType::Form => {
            let mut form = BTreeMap::new();
            form.insert("grant_type", "refresh_token");
            form.insert("refresh_token", refresh_token.as_str());
            form.insert("client_id", app_creds.client_id.as_str());
            form.insert("client_secret", app_creds.client_secret.as_str());
            request.form(&form)
        }
        TokenContentType::Json => request.json(&serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": app_creds.client_id,
            "client_secret": app_creds.client_secret,
        })),
    };

    let response = request
        .send()
        .await
        .map_err(|e| AgpError::new(ErrorCode::AdapterOperation, "oauth token request failed").with_source(e))?;

    let status = response.status();
    let body_text = response
        .text()
        .await
        .map_err(|e| AgpError::new(ErrorCode::AdapterOperation, "failed to read oauth token response").with_source(e))?;

    if !status.is_success() {
        return Err(AgpError::new(
            ErrorCode::AdapterOperation,
            format!("oauth token endpoint returned {status}: {body_text}"),
        ));
    }

    let parsed: TokenResponse = serde_json::from_str(&body_text)
        .map_err(|e| AgpError::new(ErrorCode::AdapterOperation, "oauth token response is not valid JSON").with_source(e))?;

    let new_payload = CredentialPayload {
        access_token: Some(parsed.access_token),
        refresh_token: Some(parsed.refresh_token.unwrap_or(refresh_token)),
        token_type: parsed.token_type.or(payload.token_type),
        expires_in: parsed.expires_in.or(payload.expires_in),
        ..payload
    };

    vault
        .store_credential(user_id, service, AuthType::Oauth2, &new_payload, Some(scopes))
        .await?;

    audit
        .log_audit(
            Some(user_id),
            Some(service),
            "credential_rotated",
            None,
            None,
            None,
        )
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_core::manifest::TokenContentType;
    use agp_crypto::MockKms;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn harness() -> (CredentialVault, AppCredentialStore, AuditChain) {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        let kms = Arc::new(MockKms::new("test-secret"));
        (
            CredentialVault::new(pool.clone(), kms.clone()),
            AppCredentialStore::new(pool.clone(), kms),
            AuditChain::new(pool),
        )
    }

    fn oauth_config(token_url: String) -> OAuthConfig {
        OAuthConfig {
            authorization_url: "https://example.com/authorize".into(),
            token_url,
            token_content_type: TokenContentType::Form,
            oauth_service: "stripe".into(),
            extra_auth_params: Default::default(),
        }
    }

    #[tokio::test]
    async fn refreshes_when_inside_the_window_and_preserves_refresh_token() {
        let (vault, app_creds, audit) = harness().await;
        app_creds
            .store(
                "stripe",
                &agp_vault::app_credential::AppCredentialPayload {
                    client_id: "cid".into(),
                    client_secret: "csec".into(),
                },
            )
            .await
            .unwrap();
        vault
            .store_credential(
                "alice",
                "stripe",
                AuthType::Oauth2,
                &CredentialPayload {
                    access_token: Some("stale".into()),
                    refresh_token: Some("rt1".into()),
                    expires_in: Some(60),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok2",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let config = oauth_config(format!("{}/token", server.uri()));
        refresh_if_needed(&vault, &app_creds, &audit, "alice", "stripe", &config, false)
            .await
            .unwrap();

        let refreshed = vault.retrieve_credential("alice", "stripe").await.unwrap();
        assert_eq!(refreshed.access_token, Some("tok2".into()));
        assert_eq!(refreshed.refresh_token, Some("rt1".into()));
        assert!(audit.verify().await.is_ok());
    }

    #[tokio::test]
    async fn skips_when_not_oauth2() {
        let (vault, app_creds, audit) = harness().await;
        vault
            .store_credential(
                "bob",
                "square",
                AuthType::ApiKey,
                &CredentialPayload {
                    api_key: Some("k".into()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let config = oauth_config("https://example.com/token".into());
        refresh_if_needed(&vault, &app_creds, &audit, "bob", "square", &config, true)
            .await
            .unwrap();

        let unchanged = vault.retrieve_credential("bob", "square").await.unwrap();
        assert_eq!(unchanged.api_key, Some("k".into()));
    }

    #[tokio::test]
    async fn missing_credential_is_a_silent_no_op() {
        let (vault, app_creds, audit) = harness().await;
        let config = oauth_config("https://example.com/token".into());
        let result = refresh_if_needed(&vault, &app_creds, &audit, "nobody", "github", &config, true).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn provider_failure_does_not_propagate() {
        let (vault, app_creds, audit) = harness().await;
        app_creds
            .store(
                "stripe",
                &agp_vault::app_credential::AppCredentialPayload {
                    client_id: "cid".into(),
                    client_secret: "csec".into(),
                },
            )
            .await
            .unwrap();
        vault
            .store_credential(
                "carol",
                "stripe",
                AuthType::Oauth2,
                &CredentialPayload {
                    access_token: Some("stale".into()),
                    refresh_token: Some("rt1".into()),
                    expires_in: Some(60),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let config = oauth_config(format!("{}/token", server.uri()));
        let result = refresh_if_needed(&vault, &app_creds, &audit, "carol", "stripe", &config, true).await;
        assert!(result.is_ok());

        // Credential is unchanged since the refresh failed.
        let unchanged = vault.retrieve_credential("carol", "stripe").await.unwrap();
        assert_eq!(unchanged.access_token, Some("stale".into()));
    }
}
