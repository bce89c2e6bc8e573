// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent replay cache for `POST /agp/execute`.
//!
//! Key = `"{principal_id}:{key}"`. TTL is evaluated lazily on read: a row
//! older than [`agp_core::IDEMPOTENCY_TTL_MS`] is deleted on the read that
//! discovers it and treated as a miss, rather than swept by a background
//! job.

use agp_core::IdempotencyEntry;
use agp_error::{AgpError, ErrorCode};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

/// Durable `(principal, key) -> replayed response` cache backing the
/// idempotency-key handling in front of `execute`.
pub struct IdempotencyCache {
    pool: SqlitePool,
}

fn cache_key(principal_id: &str, key: &str) -> String {
    format!("{principal_id}:{key}")
}

impl IdempotencyCache {
    /// Construct a cache over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a prior response for `(principal_id, key)`, deleting and
    /// ignoring the row if its TTL has lapsed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database or corrupt-row failure.
    pub async fn get(
        &self,
        principal_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyEntry>, AgpError> {
        let cache_key = cache_key(principal_id, key);
        let row = sqlx::query(
            "SELECT status, headers, body, created_at_ms FROM idempotency_cache WHERE cache_key = ?1",
        )
        .bind(&cache_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load idempotency entry").with_source(e))?;

        let Some(row) = row else { return Ok(None) };

        let status: i64 = row.get("status");
        let headers_json: String = row.get("headers");
        let body_json: String = row.get("body");
        let created_at_ms: i64 = row.get("created_at_ms");

        let entry = IdempotencyEntry {
            cache_key: cache_key.clone(),
            status: u16::try_from(status).unwrap_or(0),
            headers: serde_json::from_str(&headers_json)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt idempotency headers").with_source(e))?,
            body: serde_json::from_str(&body_json)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt idempotency body").with_source(e))?,
            created_at_ms,
        };

        if entry.is_expired(agp_db::now_ms()) {
            sqlx::query("DELETE FROM idempotency_cache WHERE cache_key = ?1")
                .bind(&cache_key)
                .execute(&self.pool)
                .await
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to evict expired idempotency entry").with_source(e))?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    /// Record a response for `(principal_id, key)`, overwriting any
    /// existing entry (a rewrite after expiry, or a racing duplicate
    /// write — accepts last-writer-wins here).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn put(
        &self,
        principal_id: &str,
        key: &str,
        status: u16,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<(), AgpError> {
        let cache_key = cache_key(principal_id, key);
        let headers_json = serde_json::to_string(headers)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize idempotency headers").with_source(e))?;
        let body_json = serde_json::to_string(body)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to serialize idempotency body").with_source(e))?;

        sqlx::query(
            "INSERT INTO idempotency_cache (cache_key, status, headers, body, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(cache_key) DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                created_at_ms = excluded.created_at_ms",
        )
        .bind(&cache_key)
        .bind(i64::from(status))
        .bind(&headers_json)
        .bind(&body_json)
        .bind(agp_db::now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to store idempotency entry").with_source(e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_cache() -> IdempotencyCache {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        IdempotencyCache::new(pool)
    }

    #[tokio::test]
    async fn miss_then_put_then_hit() {
        let cache = memory_cache().await;
        assert!(cache.get("alice", "key-1").await.unwrap().is_none());

        cache
            .put(
                "alice",
                "key-1",
                200,
                &[("content-type".to_string(), "application/json".to_string())],
                &serde_json::json!({"ok": true}),
            )
            .await
            .unwrap();

        let entry = cache.get("alice", "key-1").await.unwrap().unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, serde_json::json!({"ok": true}));
        assert_eq!(entry.cache_key, "alice:key-1");
    }

    #[tokio::test]
    async fn distinct_principals_do_not_share_a_key() {
        let cache = memory_cache().await;
        cache
            .put("alice", "key-1", 200, &[], &serde_json::json!({"who": "alice"}))
            .await
            .unwrap();

        assert!(cache.get("bob", "key-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache = memory_cache().await;
        cache
            .put("alice", "key-1", 200, &[], &serde_json::json!({"ok": true}))
            .await
            .unwrap();

        sqlx::query("UPDATE idempotency_cache SET created_at_ms = created_at_ms - ?1 WHERE cache_key = 'alice:key-1'")
            .bind(agp_core::IDEMPOTENCY_TTL_MS + 1)
            .execute(&cache.pool)
            .await
            .unwrap();

        assert!(cache.get("alice", "key-1").await.unwrap().is_none());

        let row = sqlx::query("SELECT 1 as present FROM idempotency_cache WHERE cache_key = 'alice:key-1'")
            .fetch_optional(&cache.pool)
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn put_overwrites_an_existing_entry() {
        let cache = memory_cache().await;
        cache
            .put("alice", "key-1", 200, &[], &serde_json::json!({"v": 1}))
            .await
            .unwrap();
        cache
            .put("alice", "key-1", 201, &[], &serde_json::json!({"v": 2}))
            .await
            .unwrap();

        let entry = cache.get("alice", "key-1").await.unwrap().unwrap();
        assert_eq!(entry.status, 201);
        assert_eq!(entry.body, serde_json::json!({"v": 2}));
    }
}
