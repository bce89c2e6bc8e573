//! Stable domain types for the Agent Gateway Protocol (AGP).
//!
//! Every entity in the data model — adapter manifests and records, vault
//! credentials, businesses, transactions, generation jobs, idempotency
//! entries, and OAuth state — lives here so every other crate in the
//! workspace can depend on one stable contract instead of redefining these
//! shapes at each boundary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Adapter manifest types and validation (`F` — Adapter Manifest).
pub mod manifest;
/// Adapter record / lifecycle state machine types (part of `G`).
pub mod adapter_record;
/// Hash-chained audit log entry shape (`D`).
pub mod audit;
/// Vault credential payload and row types (`C`).
pub mod credential;
/// Business profile types (`P`).
pub mod business;
/// Transaction record types (`O`).
pub mod transaction;
/// Generation job types (`M`/`N`).
pub mod job;
/// Small string/versioning helpers shared across crates.
pub mod slug;

pub use adapter_record::{AdapterRecord, AdapterStatus};
pub use audit::AuditEntry;
pub use business::{Business, BusinessStatus};
pub use credential::{AuthType, Credential, CredentialPayload, ConnectionSummary, ConnectionStatus};
pub use job::{GenerationJob, JobStatus};
pub use manifest::{
    AdapterManifest, AdapterManifestBuilder, AuthConfig, AuthStrategy, OAuthConfig,
    TokenContentType,
};
pub use transaction::{Transaction, TransactionStatus, Verb};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current wire-contract version embedded in health responses.
pub const CONTRACT_VERSION: &str = "agp/v1";

/// A short-lived CSRF token bound to `(user_id, service)`, guarding the
/// OAuth authorize/callback round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthState {
    /// Random opaque state token, echoed back by the provider.
    pub state: String,
    /// User initiating the connection.
    pub user_id: String,
    /// Service/platform being connected.
    pub service: String,
    /// When this state token was issued.
    pub created_at: DateTime<Utc>,
    /// When this state token expires (short TTL, typically 10 minutes).
    pub expires_at: DateTime<Utc>,
}

impl OAuthState {
    /// Returns `true` if `now` is past [`Self::expires_at`].
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A keyed, short-TTL replay entry for `execute` (`J`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    /// `(principal_id, key)` composite, stored pre-joined as `"principal:key"`.
    pub cache_key: String,
    /// HTTP status recorded for the original response.
    pub status: u16,
    /// Recorded response headers (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Recorded response body.
    pub body: serde_json::Value,
    /// Epoch milliseconds at insertion; TTL is one hour from this instant.
    pub created_at_ms: i64,
}

/// One-hour TTL for idempotency cache entries, in milliseconds.
pub const IDEMPOTENCY_TTL_MS: i64 = 60 * 60 * 1000;

impl IdempotencyEntry {
    /// Returns `true` if `now_ms` is at least [`IDEMPOTENCY_TTL_MS`] past
    /// [`Self::created_at_ms`].
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.created_at_ms) >= IDEMPOTENCY_TTL_MS
    }
}

/// Per-user envelope-encryption key record (`UserKey`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserKey {
    /// Owning user id.
    pub user_id: String,
    /// KMS-wrapped data encryption key.
    pub wrapped_dek: Vec<u8>,
    /// Identifier of the KMS key used to wrap the DEK.
    pub kms_key_id: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last rotation time, if the DEK has ever been rotated.
    pub rotated_at: Option<DateTime<Utc>>,
}

/// OAuth application (client_id/client_secret) credential per service.
///
/// Shares the envelope-encryption scheme used for user [`Credential`]s, but
/// is keyed by `service_id` alone (one set of app credentials per platform,
/// not per user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCredential {
    /// Platform/service identifier.
    pub service_id: String,
    /// Envelope-sealed ciphertext (iv || tag || ct) of the JSON payload
    /// `{ client_id, client_secret }`.
    pub ciphertext: Vec<u8>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row last-updated time.
    pub updated_at: DateTime<Utc>,
}
