//! Two-backend KMS shim: wrap/unwrap 32-byte data encryption keys.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use agp_error::{AgpError, ErrorCode};
use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Once;
use zeroize::Zeroizing;

const MOCK_WRAP_VERSION: u8 = 1;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DEK_LEN: usize = 32;

static MOCK_MODE_LOGGED: Once = Once::new();

/// Generate/wrap and decrypt/unwrap a 32-byte data encryption key.
///
/// Implementations must never log or otherwise persist the plaintext DEK.
#[async_trait]
pub trait KmsBackend: Send + Sync {
    /// Generate a fresh 32-byte DEK and return it alongside its wrapped
    /// (at-rest) form.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] if the backend call fails.
    async fn generate_data_key(&self) -> Result<(Zeroizing<[u8; 32]>, Vec<u8>), AgpError>;

    /// Unwrap a previously wrapped DEK.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] (wrapped around an authentication
    /// failure) if `wrapped` was tampered with or does not match this
    /// backend's key.
    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<Zeroizing<[u8; 32]>, AgpError>;

    /// Stable identifier recorded in [`agp_core::UserKey::kms_key_id`].
    fn key_id(&self) -> &str;
}

/// Forwards to a managed cloud KMS key id. The actual cloud SDK call is a
/// trait-object seam (`Box<dyn Fn(...) -> ... >`-free here since async
/// trait objects over foreign SDKs are normally injected at the call site
/// in production) — this shim defines the contract a concrete
/// implementation must satisfy; wiring a real SDK client in means
/// implementing [`KmsBackend`] directly against it.
pub struct ManagedKms {
    key_id: String,
}

impl ManagedKms {
    /// Construct a managed-backend shim bound to `key_id`.
    #[must_use]
    pub fn new(key_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
        }
    }
}

#[async_trait]
impl KmsBackend for ManagedKms {
    async fn generate_data_key(&self) -> Result<(Zeroizing<[u8; 32]>, Vec<u8>), AgpError> {
        Err(AgpError::new(
            ErrorCode::Internal,
            "ManagedKms requires a configured cloud KMS client; none is wired in this deployment",
        )
        .with_context("kms_key_id", &self.key_id))
    }

    async fn decrypt_data_key(&self, _wrapped: &[u8]) -> Result<Zeroizing<[u8; 32]>, AgpError> {
        Err(AgpError::new(
            ErrorCode::Internal,
            "ManagedKms requires a configured cloud KMS client; none is wired in this deployment",
        )
        .with_context("kms_key_id", &self.key_id))
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Local-only KMS backend for development and tests.
///
/// The wrapping key is `SHA-256(configured_secret || b"agp-mock-kms")`. Wrap
/// format: `version(1B) || iv(12B) || tag(16B) || ciphertext`, sealed with
/// AES-256-GCM. Any single-byte tamper fails `decrypt_data_key` with an
/// authentication error.
pub struct MockKms {
    wrapping_key: [u8; 32],
    key_id: String,
}

impl MockKms {
    /// Derive the wrapping key from `secret` and construct the backend.
    /// Logs a `tracing::warn!` exactly once, process-wide, at first
    /// construction — mock mode should never be silently used in
    /// production.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        MOCK_MODE_LOGGED.call_once(|| {
            tracing::warn!("agp-crypto: using MockKms — do not use in production");
        });
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(b"agp-mock-kms");
        let digest = hasher.finalize();
        let mut wrapping_key = [0u8; 32];
        wrapping_key.copy_from_slice(&digest);
        Self {
            wrapping_key,
            key_id: "mock".to_string(),
        }
    }
}

#[async_trait]
impl KmsBackend for MockKms {
    async fn generate_data_key(&self) -> Result<(Zeroizing<[u8; 32]>, Vec<u8>), AgpError> {
        let mut plaintext = Zeroizing::new([0u8; DEK_LEN]);
        rand::thread_rng().fill_bytes(plaintext.as_mut());

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.wrapping_key));
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ct_and_tag = cipher.encrypt(nonce, plaintext.as_slice()).map_err(|_| {
            AgpError::new(ErrorCode::Internal, "failed to wrap data key")
        })?;

        let mut wrapped = Vec::with_capacity(1 + IV_LEN + ct_and_tag.len());
        wrapped.push(MOCK_WRAP_VERSION);
        wrapped.extend_from_slice(&iv);
        wrapped.extend_from_slice(&ct_and_tag);

        Ok((plaintext, wrapped))
    }

    async fn decrypt_data_key(&self, wrapped: &[u8]) -> Result<Zeroizing<[u8; 32]>, AgpError> {
        if wrapped.len() < 1 + IV_LEN + TAG_LEN {
            return Err(AgpError::new(ErrorCode::Validation, "wrapped key too short"));
        }
        let version = wrapped[0];
        if version != MOCK_WRAP_VERSION {
            return Err(AgpError::new(
                ErrorCode::Validation,
                format!("unsupported wrap version {version}"),
            ));
        }
        let iv = &wrapped[1..1 + IV_LEN];
        let ct_and_tag = &wrapped[1 + IV_LEN..];

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.wrapping_key));
        let nonce = Nonce::from_slice(iv);

        let plaintext = cipher.decrypt(nonce, ct_and_tag).map_err(|_| {
            AgpError::new(ErrorCode::Internal, "data key authentication failed")
        })?;

        if plaintext.len() != DEK_LEN {
            return Err(AgpError::new(ErrorCode::Internal, "unwrapped key has wrong length"));
        }
        let mut out = Zeroizing::new([0u8; DEK_LEN]);
        out.copy_from_slice(&plaintext);
        Ok(out)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_generated_key() {
        let kms = MockKms::new("test-secret");
        let (plaintext, wrapped) = kms.generate_data_key().await.unwrap();
        let unwrapped = kms.decrypt_data_key(&wrapped).await.unwrap();
        assert_eq!(*plaintext, *unwrapped);
    }

    #[tokio::test]
    async fn tampering_any_byte_fails_open() {
        let kms = MockKms::new("test-secret");
        let (_plaintext, mut wrapped) = kms.generate_data_key().await.unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;
        let result = kms.decrypt_data_key(&wrapped).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn different_secrets_produce_incompatible_wrapping_keys() {
        let kms_a = MockKms::new("secret-a");
        let kms_b = MockKms::new("secret-b");
        let (_plaintext, wrapped) = kms_a.generate_data_key().await.unwrap();
        assert!(kms_b.decrypt_data_key(&wrapped).await.is_err());
    }
}
