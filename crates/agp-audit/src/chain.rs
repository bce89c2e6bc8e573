// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hash-chained append-only audit log.

use crate::redact::redact_metadata;
use agp_core::AuditEntry;
use agp_error::{AgpError, ErrorCode};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Genesis hash prepended before the first entry is ever written.
fn genesis_hash() -> String {
    hex_sha256(b"genesis")
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `SHA-256(prev.id || prev.timestamp)`, matching the write-side formula.
fn link_hash(prev_id: &str, prev_timestamp: &str) -> String {
    let mut buf = Vec::with_capacity(prev_id.len() + prev_timestamp.len());
    buf.extend_from_slice(prev_id.as_bytes());
    buf.extend_from_slice(prev_timestamp.as_bytes());
    hex_sha256(&buf)
}

/// Hash-chained audit log backed by `credential_audit_log`.
///
/// Each entry links to the one before it by `SHA-256(prev.id ||
/// prev.timestamp)`; the chain is tamper-evident, not strictly linearized —
/// concurrent writers may interleave `prev_hash` computation, but replaying
/// the ordered log forward always reconstructs a verifiable chain.
#[derive(Clone)]
pub struct AuditChain {
    pool: SqlitePool,
}

impl AuditChain {
    /// Construct a chain writer/verifier over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn latest_link(&self) -> Result<(String, String), AgpError> {
        let row = sqlx::query(
            "SELECT id, timestamp FROM credential_audit_log ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to read audit tail").with_source(e))?;

        match row {
            Some(row) => Ok((row.get::<String, _>("id"), row.get::<String, _>("timestamp"))),
            None => Ok((String::new(), String::new())),
        }
    }

    /// Append one audit entry. Never propagates an error to the caller:
    /// any underlying database failure is logged via `tracing::warn!` and
    /// the call simply returns.
    pub async fn log_audit(
        &self,
        user_id: Option<&str>,
        service_id: Option<&str>,
        action: &str,
        execution_id: Option<&str>,
        ip_address: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) {
        if let Err(e) = self
            .try_log_audit(user_id, service_id, action, execution_id, ip_address, metadata)
            .await
        {
            tracing::warn!(error = %e, action, "audit log write failed");
        }
    }

    async fn try_log_audit(
        &self,
        user_id: Option<&str>,
        service_id: Option<&str>,
        action: &str,
        execution_id: Option<&str>,
        ip_address: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), AgpError> {
        let (prev_id, prev_timestamp) = self.latest_link().await?;
        let prev_hash = if prev_id.is_empty() {
            genesis_hash()
        } else {
            link_hash(&prev_id, &prev_timestamp)
        };

        let redacted = metadata.map(redact_metadata);
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_string()),
            service_id: service_id.map(str::to_string()),
            action: action.to_string(),
            execution_id: execution_id.map(str::to_string()),
            ip_address: ip_address.map(str::to_string()),
            metadata: redacted,
            timestamp: Utc::now(),
            prev_hash,
        };

        let metadata_json = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string())
            .transpose()
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize audit metadata").with_source(e))?;

        sqlx::query(
            "INSERT INTO credential_audit_log
                (id, user_id, service_id, action, execution_id, ip_address, metadata, timestamp, prev_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.service_id)
        .bind(&entry.action)
        .bind(&entry.execution_id)
        .bind(&entry.ip_address)
        .bind(&metadata_json)
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.prev_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert audit entry").with_source(e))?;

        Ok(())
    }

    /// Re-read the whole log in chronological order and recompute the chain,
    /// returning the index of the first entry whose `prev_hash` does not
    /// match, or `Ok(())` if the chain verifies end to end.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure, or
    /// [`ErrorCode::Conflict`] naming the first broken link's entry id.
    pub async fn verify(&self) -> Result<(), AgpError> {
        let rows = sqlx::query(
            "SELECT id, timestamp, prev_hash FROM credential_audit_log ORDER BY timestamp ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to read audit log").with_source(e))?;

        let mut expected_prev_hash = genesis_hash();
        for row in &rows {
            let id: String = row.get("id");
            let timestamp: String = row.get("timestamp");
            let prev_hash: String = row.get("prev_hash");

            if prev_hash != expected_prev_hash {
                return Err(AgpError::new(ErrorCode::Conflict, "audit chain verification failed")
                    .with_context("entry_id", &id));
            }
            expected_prev_hash = link_hash(&id, &timestamp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn chain() -> AuditChain {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        AuditChain::new(pool)
    }

    #[tokio::test]
    async fn first_entry_links_to_genesis() {
        let chain = chain().await;
        chain
            .log_audit(Some("alice"), Some("stripe"), "credential_stored", None, None, None)
            .await;

        let row = sqlx::query("SELECT prev_hash FROM credential_audit_log")
            .fetch_one(&chain.pool)
            .await
            .unwrap();
        let prev_hash: String = row.get("prev_hash");
        assert_eq!(prev_hash, genesis_hash());
    }

    #[tokio::test]
    async fn chain_verifies_after_several_writes() {
        let chain = chain().await;
        for action in ["credential_stored", "credential_rotated", "credential_deleted"] {
            chain.log_audit(Some("alice"), Some("stripe"), action, None, None, None).await;
        }
        assert!(chain.verify().await.is_ok());
    }

    #[tokio::test]
    async fn redacts_metadata_before_persisting() {
        let chain = chain().await;
        chain
            .log_audit(
                Some("alice"),
                Some("stripe"),
                "credential_rotated",
                None,
                None,
                Some(serde_json::json!({ "access_token": "tok-live" })),
            )
            .await;

        let row = sqlx::query("SELECT metadata FROM credential_audit_log")
            .fetch_one(&chain.pool)
            .await
            .unwrap();
        let metadata: String = row.get("metadata");
        assert!(!metadata.contains("tok-live"));
        assert!(metadata.contains("[redacted]"));
    }

    #[tokio::test]
    async fn log_audit_never_panics_on_a_closed_pool() {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        let chain = AuditChain::new(pool.clone());
        pool.close().await;
        // Pool is closed; the write will fail, but `log_audit` must swallow it.
        chain.log_audit(None, None, "noop", None, None, None).await;
    }
}
