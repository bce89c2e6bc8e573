//! Vault credential rows and the decrypted payload shape.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a stored credential authenticates outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// OAuth 2.0 access/refresh token pair.
    Oauth2,
    /// Static API key.
    ApiKey,
    /// Session cookie.
    Cookie,
    /// HTTP Basic username/password.
    Basic,
    /// Application-level OAuth (client credentials stored per-service).
    AppOauth,
    /// OAuth 2.0 client-credentials grant, managed entirely by the adapter.
    ClientCredentials,
}

/// One row per `(user_id, service_id)`. The `ciphertext` is an envelope
/// blob: 12-byte IV, 16-byte AES-GCM tag, and ciphertext of the JSON
/// [`CredentialPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Owning user id.
    pub user_id: String,
    /// Normalized (lowercase, trimmed) service identifier.
    pub service_id: String,
    /// Authentication mechanism.
    pub auth_type: AuthType,
    /// Envelope-sealed ciphertext of the JSON payload.
    pub ciphertext: Vec<u8>,
    /// Scopes granted, if applicable.
    pub scopes: Vec<String>,
    /// Derived from `expires_in` at store time; only set for `Oauth2`
    /// credentials whose payload included `expires_in`.
    pub expires_at: Option<DateTime<Utc>>,
    /// Updated on every successful [`crate::Credential`] retrieval.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row last-updated time.
    pub updated_at: DateTime<Utc>,
}

/// Decrypted credential payload shape (after envelope `open` + JSON parse).
///
/// All fields are optional because the shape varies by [`AuthType`]; callers
/// match on [`Credential::auth_type`] to know which fields to expect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CredentialPayload {
    /// OAuth access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// OAuth refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// OAuth token type, typically `"Bearer"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Seconds until the access token expires, as reported by the provider
    /// at store/refresh time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Static API key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Cookie name, for the `Cookie` auth type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    /// Cookie value, for the `Cookie` auth type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_value: Option<String>,
    /// Basic-auth username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// OAuth client id (app-level credentials).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// OAuth client secret (app-level credentials).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Derived connection health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No expiry tracked, or not yet expired.
    Connected,
    /// `expires_at` is in the past.
    Expired,
}

/// Metadata-only view of a stored credential, returned by `listConnections`.
/// Never carries ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionSummary {
    /// Normalized service identifier.
    pub service_id: String,
    /// Authentication mechanism.
    pub auth_type: AuthType,
    /// Scopes granted.
    pub scopes: Vec<String>,
    /// Derived connection status.
    pub status: ConnectionStatus,
    /// Expiry, if tracked.
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful retrieval time.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl ConnectionSummary {
    /// Derive [`ConnectionStatus`] from `expires_at` relative to `now`.
    #[must_use]
    pub fn status_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ConnectionStatus {
        match expires_at {
            Some(exp) if exp <= now => ConnectionStatus::Expired,
            _ => ConnectionStatus::Connected,
        }
    }
}

/// Normalize a service identifier: lowercase, trimmed.
#[must_use]
pub fn normalize_service_id(service: &str) -> String {
    service.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn normalizes_service_id() {
        assert_eq!(normalize_service_id("  Stripe  "), "stripe");
    }

    #[test]
    fn status_connected_without_expiry() {
        let now = Utc::now();
        assert_eq!(
            ConnectionSummary::status_at(None, now),
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn status_expired_in_the_past() {
        let now = Utc::now();
        let expires = now - Duration::seconds(1);
        assert_eq!(
            ConnectionSummary::status_at(Some(expires), now),
            ConnectionStatus::Expired
        );
    }
}
