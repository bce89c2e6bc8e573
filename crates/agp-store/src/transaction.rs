// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent `transactions` table CRUD.

use agp_core::{Transaction, TransactionStatus, Verb};
use agp_error::{AgpError, ErrorCode};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn verb_str(verb: Verb) -> &'static str {
    match verb {
        Verb::Discover => "discover",
        Verb::Query => "query",
        Verb::Execute => "execute",
    }
}

fn parse_verb(raw: &str) -> Verb {
    match raw {
        "query" => Verb::Query,
        "execute" => Verb::Execute,
        _ => Verb::Discover,
    }
}

fn status_str(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Succeeded => "succeeded",
        TransactionStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> TransactionStatus {
    match raw {
        "succeeded" => TransactionStatus::Succeeded,
        "failed" => TransactionStatus::Failed,
        _ => TransactionStatus::Pending,
    }
}

fn row_to_transaction(row: sqlx::sqlite::SqliteRow) -> Result<Transaction, AgpError> {
    let id: String = row.get("id");
    let input_json: String = row.get("input");
    let result_json: Option<String> = row.get("result");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Transaction {
        id: Uuid::parse_str(&id)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt transaction id").with_source(e))?,
        verb: parse_verb(&row.get::<String, _>("verb")),
        business_id: row.get("business_id"),
        input: serde_json::from_str(&input_json)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt transaction input").with_source(e))?,
        owner_key_id: row.get("owner_key_id"),
        status: parse_status(&row.get::<String, _>("status")),
        result: result_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt transaction result").with_source(e))?,
        error: row.get("error"),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

/// Persistent store for [`Transaction`] rows.
#[derive(Clone)]
pub struct TransactionStore {
    pool: SqlitePool,
}

impl TransactionStore {
    /// Construct a store over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new transaction row (typically already `Pending`, per
    /// [`Transaction::new_pending`]).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn create(&self, transaction: &Transaction) -> Result<(), AgpError> {
        sqlx::query(
            "INSERT INTO transactions (id, verb, business_id, input, owner_key_id, status, result, error,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(transaction.id.to_string())
        .bind(verb_str(transaction.verb))
        .bind(&transaction.business_id)
        .bind(serde_json::to_string(&transaction.input).unwrap_or_default())
        .bind(&transaction.owner_key_id)
        .bind(status_str(transaction.status))
        .bind(transaction.result.as_ref().map(|v| serde_json::to_string(v).unwrap_or_default()))
        .bind(&transaction.error)
        .bind(transaction.created_at.to_rfc3339())
        .bind(transaction.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert transaction").with_source(e))?;
        Ok(())
    }

    /// Mark a transaction `succeeded` with its result payload.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<(), AgpError> {
        sqlx::query("UPDATE transactions SET status = 'succeeded', result = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(&result).unwrap_or_default())
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to mark transaction succeeded").with_source(e))?;
        Ok(())
    }

    /// Mark a transaction `failed` with an error string.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AgpError> {
        sqlx::query("UPDATE transactions SET status = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(error)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to mark transaction failed").with_source(e))?;
        Ok(())
    }

    /// Fetch a transaction by id if `caller_id` is permitted to see it
    /// (per [`Transaction::is_visible_to`]).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::BusinessNotFound`]-shaped
    /// [`ErrorCode::AdapterNotFound`]... actually returns `None` for both
    /// "not found" and "not visible", so callers cannot distinguish the
    /// two (intentional: avoids leaking existence of another owner's
    /// transaction).
    pub async fn get_visible(&self, id: Uuid, caller_id: &str) -> Result<Option<Transaction>, AgpError> {
        let row = sqlx::query(
            "SELECT id, verb, business_id, input, owner_key_id, status, result, error, created_at, updated_at
             FROM transactions WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to load transaction").with_source(e))?;

        let Some(row) = row else { return Ok(None) };
        let transaction = row_to_transaction(row)?;
        if transaction.is_visible_to(caller_id) {
            Ok(Some(transaction))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> TransactionStore {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        TransactionStore::new(pool)
    }

    #[tokio::test]
    async fn create_then_fetch_round_trips() {
        let store = memory_store().await;
        let tx = Transaction::new_pending(Verb::Query, "biz-1", serde_json::json!({}), "owner-1", chrono::Utc::now());
        store.create(&tx).await.unwrap();

        let fetched = store.get_visible(tx.id, "owner-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn hides_transactions_from_non_owners() {
        let store = memory_store().await;
        let tx = Transaction::new_pending(Verb::Query, "biz-1", serde_json::json!({}), "owner-1", chrono::Utc::now());
        store.create(&tx).await.unwrap();

        assert!(store.get_visible(tx.id, "owner-2").await.unwrap().is_none());
        assert!(store.get_visible(tx.id, "admin").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mark_succeeded_then_failed_updates_status() {
        let store = memory_store().await;
        let tx = Transaction::new_pending(Verb::Execute, "biz-1", serde_json::json!({}), "owner-1", chrono::Utc::now());
        store.create(&tx).await.unwrap();

        store.mark_succeeded(tx.id, serde_json::json!({"ok": true})).await.unwrap();
        let fetched = store.get_visible(tx.id, "owner-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, TransactionStatus::Succeeded);
        assert_eq!(fetched.result, Some(serde_json::json!({"ok": true})));
    }
}
