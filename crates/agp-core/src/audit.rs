//! Hash-chained audit log entry shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row in the append-only `credential_audit_log`.
///
/// `prev_hash` links each entry to the one before it:
/// `SHA-256(prev.id || prev.timestamp)`, with `SHA-256("genesis")` for the
/// first entry ever written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id.
    pub id: String,
    /// Acting user, if the action is user-scoped.
    pub user_id: Option<String>,
    /// Affected service/platform, if applicable.
    pub service_id: Option<String>,
    /// Short action label, e.g. `"credential_stored"`, `"credential_rotated"`.
    pub action: String,
    /// Correlated transaction/execution id, if this entry was produced
    /// during an `execute` call.
    pub execution_id: Option<String>,
    /// Caller IP address, if known.
    pub ip_address: Option<String>,
    /// Redacted, free-form structured detail.
    pub metadata: Option<serde_json::Value>,
    /// Wall-clock time the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Hash linking to the previous entry.
    pub prev_hash: String,
}
