//! Persistent adapter record and lifecycle status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one [`AdapterRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    /// Owner-scoped, not yet submitted for review.
    Sandbox,
    /// Submitted, awaiting admin promotion/rejection.
    Review,
    /// Promoted; visible to every caller under `scope_key = "__public__"`.
    Public,
    /// Rejected by an admin with feedback; owner may revise and resubmit.
    Rejected,
    /// Archived (soft-deleted); restorable if `source_code` was preserved.
    Archived,
}

impl AdapterStatus {
    /// Returns `true` if this status has no outgoing lifecycle transitions
    /// other than the ones explicitly modeled (archived is not literally
    /// terminal — it can be restored to `Sandbox` — but has no further
    /// *forward* transitions).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterStatus::Rejected | AdapterStatus::Archived)
    }

    /// Returns `true` if `to` is a legal transition from `self`.
    #[must_use]
    pub fn can_transition_to(&self, to: AdapterStatus) -> bool {
        use AdapterStatus::*;
        matches!(
            (self, to),
            (Sandbox, Review)
                | (Review, Sandbox)
                | (Review, Public)
                | (Sandbox, Public)
                | (Public, Sandbox)
                | (Sandbox, Archived)
                | (Review, Archived)
                | (Public, Archived)
                | (Rejected, Archived)
                | (Archived, Sandbox)
        )
    }
}

/// One adapter version on disk, keyed by the natural key
/// `(platform, owner_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdapterRecord {
    /// Surrogate id.
    pub id: String,
    /// Lowercase dns-like platform slug.
    pub platform: String,
    /// `"system"` for bundled public adapters, otherwise the owning
    /// principal id.
    pub owner_id: String,
    /// Current lifecycle status.
    pub status: AdapterStatus,
    /// Absolute path inside the runtime directory (never the bundled
    /// directory).
    pub file_path: String,
    /// Textual adapter source (in this rendition: a declarative
    /// [descriptor](agp-registry) JSON document).
    pub source_code: Option<String>,
    /// `sha256` hex digest of `source_code`.
    pub source_hash: Option<String>,
    /// Optional semver string.
    pub version: Option<String>,
    /// When the adapter was submitted for review.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When an admin last reviewed the adapter.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// When the adapter was archived.
    pub archived_at: Option<DateTime<Utc>>,
    /// Free-text message accompanying a submission.
    pub review_message: Option<String>,
    /// Free-text feedback accompanying a rejection.
    pub review_feedback: Option<String>,
    /// Principal id of the admin who promoted this adapter to public.
    pub promoted_by: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Row last-updated time.
    pub updated_at: DateTime<Utc>,
}

/// The special `owner_id` used for bundled public adapters.
pub const SYSTEM_OWNER: &str = "system";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_to_public_is_legal() {
        assert!(AdapterStatus::Sandbox.can_transition_to(AdapterStatus::Public));
    }

    #[test]
    fn public_to_review_is_illegal() {
        assert!(!AdapterStatus::Public.can_transition_to(AdapterStatus::Review));
    }

    #[test]
    fn archived_can_restore_to_sandbox() {
        assert!(AdapterStatus::Archived.can_transition_to(AdapterStatus::Sandbox));
    }

    #[test]
    fn rejected_and_archived_are_terminal() {
        assert!(AdapterStatus::Rejected.is_terminal());
        assert!(AdapterStatus::Archived.is_terminal());
        assert!(!AdapterStatus::Sandbox.is_terminal());
    }
}
