//! OAuth application (client_id/client_secret) store, one row per service
//! rather than per user.

use agp_core::adapter_record::SYSTEM_OWNER;
use agp_core::credential::normalize_service_id;
use agp_crypto::{seal, with_decrypted_credential, KmsBackend, SealedBlob};
use agp_error::{AgpError, ErrorCode};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Decrypted application credential payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCredentialPayload {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
}

/// Stores one `(client_id, client_secret)` pair per platform, sealed under
/// a single system-wide DEK (keyed by [`SYSTEM_OWNER`] in `user_keys`,
/// reusing the same envelope scheme as per-user credentials).
#[derive(Clone)]
pub struct AppCredentialStore {
    pool: SqlitePool,
    kms: Arc<dyn KmsBackend>,
}

impl AppCredentialStore {
    /// Construct a store over `pool`, wrapping/unwrapping the system DEK
    /// via `kms`.
    #[must_use]
    pub fn new(pool: SqlitePool, kms: Arc<dyn KmsBackend>) -> Self {
        Self { pool, kms }
    }

    /// Store (insert or replace) the application credential for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on any KMS, crypto, or database
    /// failure.
    pub async fn store(
        &self,
        service: &str,
        payload: &AppCredentialPayload,
    ) -> Result<(), AgpError> {
        let service_id = normalize_service_id(service);
        let wrapped_dek = crate::ensure_user_key(&self.pool, self.kms.as_ref(), SYSTEM_OWNER).await?;
        let dek = self.kms.decrypt_data_key(&wrapped_dek).await?;

        let mut plaintext_json = Zeroizing::new(
            serde_json::to_vec(payload)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize app credential").with_source(e))?,
        );
        let sealed = seal(&plaintext_json, dek.as_slice());
        plaintext_json.fill(0);
        let ciphertext = sealed?.to_bytes();

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO app_credentials (service_id, ciphertext, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(service_id) DO UPDATE SET ciphertext = excluded.ciphertext, updated_at = excluded.updated_at",
        )
        .bind(&service_id)
        .bind(&ciphertext)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to store app credential").with_source(e))?;

        Ok(())
    }

    /// Retrieve and decrypt the application credential for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::CredentialNotFound`] if no row exists.
    pub async fn retrieve(&self, service: &str) -> Result<AppCredentialPayload, AgpError> {
        let service_id = normalize_service_id(service);
        let row = sqlx::query(
            "SELECT c.ciphertext AS ciphertext, u.wrapped_dek AS wrapped_dek
             FROM app_credentials c JOIN user_keys u ON u.user_id = ?1
             WHERE c.service_id = ?2",
        )
        .bind(SYSTEM_OWNER)
        .bind(&service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load app credential").with_source(e))?
        .ok_or_else(|| {
            AgpError::new(ErrorCode::CredentialNotFound, "no application credential for this service")
                .with_context("service", &service_id)
        })?;

        let ciphertext: Vec<u8> = row.get("ciphertext");
        let wrapped_dek: Vec<u8> = row.get("wrapped_dek");
        let sealed = SealedBlob::from_bytes(&ciphertext)?;

        with_decrypted_credential(self.kms.as_ref(), &wrapped_dek, &sealed, |p: AppCredentialPayload| Ok(p)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_crypto::MockKms;

    #[tokio::test]
    async fn round_trip_store_and_retrieve() {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        let store = AppCredentialStore::new(pool, Arc::new(MockKms::new("test-secret")));
        let payload = AppCredentialPayload {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
        };
        store.store("stripe", &payload).await.unwrap();
        let fetched = store.retrieve("stripe").await.unwrap();
        assert_eq!(fetched.client_id, "client-123");
        assert_eq!(fetched.client_secret, "shh");
    }

    #[tokio::test]
    async fn missing_app_credential_is_not_found() {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        let store = AppCredentialStore::new(pool, Arc::new(MockKms::new("test-secret")));
        let err = store.retrieve("github").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialNotFound);
    }
}
