//! Persistent per-call transaction records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three AGP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// List capabilities/resources the adapter exposes for a business.
    Discover,
    /// Read-only lookup against the third-party API.
    Query,
    /// Mutating call against the third-party API.
    Execute,
}

/// Lifecycle status of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created, adapter invocation in flight.
    Pending,
    /// Adapter invocation returned successfully.
    Succeeded,
    /// Adapter invocation failed or timed out.
    Failed,
}

/// A persistent record of one AGP verb invocation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    /// Unique transaction id.
    pub id: Uuid,
    /// Verb invoked.
    pub verb: Verb,
    /// Target business id.
    pub business_id: String,
    /// Verb-specific input payload.
    pub input: serde_json::Value,
    /// Principal id that owns this transaction (used for `status` scoping).
    pub owner_key_id: String,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Adapter result, present once `status == Succeeded`.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error string, present once `status == Failed`.
    #[serde(default)]
    pub error: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row last-updated time.
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Construct a new `Pending` transaction with a fresh id and timestamps
    /// set to `now`.
    #[must_use]
    pub fn new_pending(
        verb: Verb,
        business_id: impl Into<String>,
        input: serde_json::Value,
        owner_key_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            verb,
            business_id: business_id.into(),
            input,
            owner_key_id: owner_key_id.into(),
            status: TransactionStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if `caller_id` is the owner or the special admin id.
    #[must_use]
    pub fn is_visible_to(&self, caller_id: &str) -> bool {
        caller_id == "admin" || self.owner_key_id == caller_id
    }
}
