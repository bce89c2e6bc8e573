//! Per-user credential vault: DEK lifecycle, envelope-sealed
//! credential storage, and connection listing.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Envelope-encrypted OAuth application (client_id/client_secret) store.
pub mod app_credential;

pub use app_credential::AppCredentialStore;

use agp_core::{
    credential::normalize_service_id, AuthType, ConnectionSummary, CredentialPayload,
};
use agp_crypto::{seal, with_decrypted_credential, KmsBackend, SealedBlob};
use agp_error::{AgpError, ErrorCode};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Ensure a `UserKey` row exists for `owner_id`, creating one with a
/// freshly generated DEK if absent. On a unique-constraint race with a
/// concurrent creator, reloads the row the other writer inserted.
///
/// Shared between [`CredentialVault`] (keyed by real user ids) and
/// [`app_credential::AppCredentialStore`] (keyed by
/// [`agp_core::adapter_record::SYSTEM_OWNER`]) since both need exactly one
/// wrapped DEK per owner.
async fn ensure_user_key(
    pool: &SqlitePool,
    kms: &dyn KmsBackend,
    owner_id: &str,
) -> Result<Vec<u8>, AgpError> {
    if let Some(row) = sqlx::query("SELECT wrapped_dek FROM user_keys WHERE user_id = ?1")
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load user key").with_source(e))?
    {
        return Ok(row.get::<Vec<u8>, _>("wrapped_dek"));
    }

    let (plaintext_dek, wrapped) = kms.generate_data_key().await?;
    // `plaintext_dek` is only needed to prove the round trip works; the
    // vault never persists it. Zeroizing drops it at end of scope.
    let _ = Zeroizing::new(*plaintext_dek);

    let now = Utc::now().to_rfc3339();
    let insert = sqlx::query(
        "INSERT INTO user_keys (user_id, wrapped_dek, kms_key_id, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(owner_id)
    .bind(&wrapped)
    .bind(kms.key_id())
    .bind(&now)
    .execute(pool)
    .await;

    match insert {
        Ok(_) => Ok(wrapped),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            let row = sqlx::query("SELECT wrapped_dek FROM user_keys WHERE user_id = ?1")
                .bind(owner_id)
                .fetch_one(pool)
                .await
                .map_err(|e| {
                    AgpError::new(ErrorCode::Internal, "failed to reload user key after race")
                        .with_source(e)
                })?;
            Ok(row.get::<Vec<u8>, _>("wrapped_dek"))
        }
        Err(e) => Err(AgpError::new(ErrorCode::Internal, "failed to create user key").with_source(e)),
    }
}

/// Per-user envelope-encryption credential store.
#[derive(Clone)]
pub struct CredentialVault {
    pool: SqlitePool,
    kms: Arc<dyn KmsBackend>,
}

impl CredentialVault {
    /// Construct a vault over `pool`, wrapping/unwrapping DEKs via `kms`.
    #[must_use]
    pub fn new(pool: SqlitePool, kms: Arc<dyn KmsBackend>) -> Self {
        Self { pool, kms }
    }

    /// Store (insert or replace) a credential for `(user_id, service)`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on any underlying KMS, crypto, or
    /// database failure.
    pub async fn store_credential(
        &self,
        user_id: &str,
        service: &str,
        auth_type: AuthType,
        payload: &CredentialPayload,
        scopes: Option<Vec<String>>,
    ) -> Result<(), AgpError> {
        let service_id = normalize_service_id(service);
        let wrapped_dek = ensure_user_key(&self.pool, self.kms.as_ref(), user_id).await?;
        let dek = self.kms.decrypt_data_key(&wrapped_dek).await?;

        let mut plaintext_json = Zeroizing::new(
            serde_json::to_vec(payload)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize payload").with_source(e))?,
        );
        let sealed = seal(&plaintext_json, dek.as_slice());
        plaintext_json.fill(0);
        let sealed = sealed?;
        let ciphertext = sealed.to_bytes();

        let expires_at = match (auth_type, payload.expires_in) {
            (AuthType::Oauth2, Some(secs)) => Some(Utc::now() + Duration::seconds(secs)),
            _ => None,
        };

        let scopes_json = serde_json::to_string(&scopes.unwrap_or_default())
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize scopes").with_source(e))?;
        let now = Utc::now().to_rfc3339();
        let auth_type_str = serde_json::to_value(auth_type)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize auth_type").with_source(e))?
            .as_str()
            .unwrap_or_default()
            .to_string();

        sqlx::query(
            "INSERT INTO credentials (user_id, service_id, auth_type, ciphertext, scopes, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(user_id, service_id) DO UPDATE SET
                auth_type = excluded.auth_type,
                ciphertext = excluded.ciphertext,
                scopes = excluded.scopes,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(&service_id)
        .bind(&auth_type_str)
        .bind(&ciphertext)
        .bind(&scopes_json)
        .bind(expires_at.map(|e| e.to_rfc3339()))
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to store credential").with_source(e))?;

        Ok(())
    }

    /// Retrieve and decrypt the credential for `(user_id, service)`,
    /// updating `last_used_at`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::CredentialNotFound`] if no row exists, or
    /// [`ErrorCode::Internal`] on decrypt/parse failure.
    pub async fn retrieve_credential(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<CredentialPayload, AgpError> {
        let service_id = normalize_service_id(service);
        let row = sqlx::query(
            "SELECT c.ciphertext AS ciphertext, u.wrapped_dek AS wrapped_dek
             FROM credentials c JOIN user_keys u ON u.user_id = c.user_id
             WHERE c.user_id = ?1 AND c.service_id = ?2",
        )
        .bind(user_id)
        .bind(&service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load credential").with_source(e))?
        .ok_or_else(|| {
            AgpError::new(ErrorCode::CredentialNotFound, "no credential stored for this service")
                .with_context("service", &service_id)
        })?;

        let ciphertext: Vec<u8> = row.get("ciphertext");
        let wrapped_dek: Vec<u8> = row.get("wrapped_dek");
        let sealed = SealedBlob::from_bytes(&ciphertext)?;

        let payload = with_decrypted_credential(
            self.kms.as_ref(),
            &wrapped_dek,
            &sealed,
            |p: CredentialPayload| Ok(p),
        )
        .await?;

        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE credentials SET last_used_at = ?1 WHERE user_id = ?2 AND service_id = ?3")
            .bind(&now)
            .bind(user_id)
            .bind(&service_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update last_used_at").with_source(e))?;

        Ok(payload)
    }

    /// Load `(auth_type, expires_at, scopes)` for `(user_id, service)`
    /// without touching ciphertext or `last_used_at` — the cheap precheck
    /// `refresh_if_needed` uses before deciding whether a refresh is due.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn credential_meta(
        &self,
        user_id: &str,
        service: &str,
    ) -> Result<Option<(AuthType, Option<DateTime<Utc>>, Vec<String>)>, AgpError> {
        let service_id = normalize_service_id(service);
        let row = sqlx::query(
            "SELECT auth_type, expires_at, scopes FROM credentials WHERE user_id = ?1 AND service_id = ?2",
        )
        .bind(user_id)
        .bind(&service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load credential metadata").with_source(e))?;

        let Some(row) = row else { return Ok(None) };
        let auth_type_str: String = row.get("auth_type");
        let auth_type: AuthType = serde_json::from_value(serde_json::Value::String(auth_type_str))
            .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt auth_type column").with_source(e))?;
        let expires_at: Option<String> = row.get("expires_at");
        let expires_at = expires_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let scopes_json: String = row.get("scopes");
        let scopes: Vec<String> = serde_json::from_str(&scopes_json).unwrap_or_default();

        Ok(Some((auth_type, expires_at, scopes)))
    }

    /// Delete the credential for `(user_id, service)`, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn delete_credential(&self, user_id: &str, service: &str) -> Result<(), AgpError> {
        let service_id = normalize_service_id(service);
        sqlx::query("DELETE FROM credentials WHERE user_id = ?1 AND service_id = ?2")
            .bind(user_id)
            .bind(&service_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to delete credential").with_source(e))?;
        Ok(())
    }

    /// List connection metadata (no ciphertext) for `user_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn list_connections(&self, user_id: &str) -> Result<Vec<ConnectionSummary>, AgpError> {
        let rows = sqlx::query(
            "SELECT service_id, auth_type, scopes, expires_at, last_used_at, created_at
             FROM credentials WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to list connections").with_source(e))?;

        let now = Utc::now();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let auth_type_str: String = row.get("auth_type");
            let auth_type: AuthType = serde_json::from_value(serde_json::Value::String(auth_type_str))
                .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt auth_type column").with_source(e))?;
            let scopes_json: String = row.get("scopes");
            let scopes: Vec<String> = serde_json::from_str(&scopes_json).unwrap_or_default();
            let expires_at: Option<String> = row.get("expires_at");
            let expires_at = expires_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let last_used_at: Option<String> = row.get("last_used_at");
            let last_used_at = last_used_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let created_at: String = row.get("created_at");
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now);

            out.push(ConnectionSummary {
                service_id: row.get("service_id"),
                auth_type,
                scopes,
                status: ConnectionSummary::status_at(expires_at, now),
                expires_at,
                last_used_at,
                created_at,
            });
        }
        Ok(out)
    }

    /// Returns `true` if a credential row exists for `(user_id, service)`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn has_credential(&self, user_id: &str, service: &str) -> Result<bool, AgpError> {
        let service_id = normalize_service_id(service);
        let row = sqlx::query("SELECT 1 AS present FROM credentials WHERE user_id = ?1 AND service_id = ?2")
            .bind(user_id)
            .bind(&service_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to check credential").with_source(e))?;
        Ok(row.is_some())
    }

    /// Borrow the underlying pool, for crates (e.g. `agp-oauth`) that need
    /// to share the connection without re-deriving it from config.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Borrow the configured KMS backend.
    #[must_use]
    pub fn kms(&self) -> &Arc<dyn KmsBackend> {
        &self.kms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_crypto::MockKms;

    async fn test_vault() -> CredentialVault {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        CredentialVault::new(pool, Arc::new(MockKms::new("test-secret")))
    }

    #[tokio::test]
    async fn round_trip_store_and_retrieve() {
        let vault = test_vault().await;
        let payload = CredentialPayload {
            access_token: Some("tok1".into()),
            refresh_token: Some("rt1".into()),
            expires_in: Some(3600),
            ..Default::default()
        };
        vault
            .store_credential("alice", "stripe", AuthType::Oauth2, &payload, None)
            .await
            .unwrap();

        let fetched = vault.retrieve_credential("alice", "stripe").await.unwrap();
        assert_eq!(fetched.access_token, Some("tok1".into()));
        assert_eq!(fetched.refresh_token, Some("rt1".into()));

        let connections = vault.list_connections("alice").await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(
            connections[0].status,
            agp_core::ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn retrieve_missing_credential_is_not_found() {
        let vault = test_vault().await;
        let err = vault
            .retrieve_credential("bob", "github")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialNotFound);
    }

    #[tokio::test]
    async fn delete_then_has_credential_is_false() {
        let vault = test_vault().await;
        vault
            .store_credential("carol", "square", AuthType::ApiKey, &CredentialPayload {
                api_key: Some("k".into()),
                ..Default::default()
            }, None)
            .await
            .unwrap();
        assert!(vault.has_credential("carol", "square").await.unwrap());
        vault.delete_credential("carol", "square").await.unwrap();
        assert!(!vault.has_credential("carol", "square").await.unwrap());
    }

    #[tokio::test]
    async fn service_ids_are_normalized() {
        let vault = test_vault().await;
        vault
            .store_credential("dave", "  Stripe  ", AuthType::ApiKey, &CredentialPayload {
                api_key: Some("k".into()),
                ..Default::default()
            }, None)
            .await
            .unwrap();
        assert!(vault.has_credential("dave", "stripe").await.unwrap());
    }
}
