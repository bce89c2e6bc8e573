//! Generation job queue entity.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`GenerationJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Enqueued, not yet claimed by a worker.
    Queued,
    /// Claimed by a worker, generation in progress.
    Running,
    /// Generation succeeded and the sandbox adapter was hot-loaded.
    Complete,
    /// Generation failed.
    Failed,
}

/// A background task that produces a new sandbox adapter from platform
/// documentation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerationJob {
    /// Unique job id.
    pub id: Uuid,
    /// Target platform slug.
    pub platform: String,
    /// Optional documentation URL the generator should consult.
    #[serde(default)]
    pub docs_url: Option<String>,
    /// Optional LLM provider override.
    #[serde(default)]
    pub provider: Option<String>,
    /// Optional LLM model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Owner who requested generation; the sandbox adapter is scoped to
    /// this principal.
    #[serde(default)]
    pub owner_key_id: Option<String>,
    /// Ordered log lines appended during the run.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Generator result, present once `status == Complete`.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error message, present once `status == Failed`.
    #[serde(default)]
    pub error: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// When a worker claimed the job.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Error message used for jobs left `Running` across a server restart
///.
pub const ORPHANED_BY_RESTART: &str = "Orphaned by server restart";

/// Maximum `appendJobLog` compare-and-swap retries before giving up.
pub const APPEND_LOG_MAX_RETRIES: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphan_message_is_stable() {
        assert_eq!(ORPHANED_BY_RESTART, "Orphaned by server restart");
    }
}
