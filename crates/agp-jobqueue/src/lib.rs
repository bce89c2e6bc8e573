// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent generation job queue and the background worker that drains
//! it into newly hot-loaded sandbox adapters.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Generator trait and the persistent poll loop that drives it.
pub mod worker;

use agp_core::job::{GenerationJob, JobStatus, APPEND_LOG_MAX_RETRIES, ORPHANED_BY_RESTART};
use agp_error::{AgpError, ErrorCode};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Complete => "complete",
        JobStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> JobStatus {
    match raw {
        "running" => JobStatus::Running,
        "complete" => JobStatus::Complete,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Result<GenerationJob, AgpError> {
    let id: String = row.get("id");
    let logs_json: String = row.get("logs");
    let result_json: Option<String> = row.get("result");
    let created_at: String = row.get("created_at");
    let started_at: Option<String> = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    let parse_ts = |s: &str| {
        chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now())
    };

    Ok(GenerationJob {
        id: Uuid::parse_str(&id).map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt job id").with_source(e))?,
        platform: row.get("platform"),
        docs_url: row.get("docs_url"),
        provider: row.get("provider"),
        model: row.get("model"),
        status: parse_status(&row.get::<String, _>("status")),
        owner_key_id: row.get("owner_key_id"),
        logs: serde_json::from_str(&logs_json)
            .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt job logs").with_source(e))?,
        result: result_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| AgpError::new(ErrorCode::Internal, "corrupt job result").with_source(e))?,
        error: row.get("error"),
        created_at: parse_ts(&created_at),
        started_at: started_at.as_deref().map(parse_ts),
        completed_at: completed_at.as_deref().map(parse_ts),
    })
}

/// Persistent store for [`GenerationJob`] rows, plus the atomic claim and
/// log-append operations the worker needs.
pub struct JobQueue {
    pool: SqlitePool,
}

impl JobQueue {
    /// Construct a queue over `pool`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enqueue a new job in `queued` status.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn create_job(
        &self,
        platform: &str,
        docs_url: Option<String>,
        provider: Option<String>,
        model: Option<String>,
        owner_key_id: Option<String>,
    ) -> Result<GenerationJob, AgpError> {
        let job = GenerationJob {
            id: Uuid::new_v4(),
            platform: platform.to_string(),
            docs_url,
            provider,
            model,
            status: JobStatus::Queued,
            owner_key_id,
            logs: Vec::new(),
            result: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO generation_jobs
                (id, platform, docs_url, provider, model, status, owner_key_id, logs, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, '[]', ?7)",
        )
        .bind(job.id.to_string())
        .bind(&job.platform)
        .bind(&job.docs_url)
        .bind(&job.provider)
        .bind(&job.model)
        .bind(&job.owner_key_id)
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert generation job").with_source(e))?;

        Ok(job)
    }

    /// Atomically claim the oldest `queued` job, moving it to `running` and
    /// stamping `started_at`. Safe to call from multiple workers
    /// concurrently: the `UPDATE ... RETURNING` is a single statement, so
    /// exactly one caller wins a given row.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn claim_next_job(&self) -> Result<Option<GenerationJob>, AgpError> {
        let now = chrono::Utc::now().to_rfc3339();
        let row = sqlx::query(
            "UPDATE generation_jobs SET status = 'running', started_at = ?1
             WHERE id = (
                 SELECT id FROM generation_jobs WHERE status = 'queued'
                 ORDER BY created_at ASC, id ASC LIMIT 1
             )
             RETURNING id, platform, docs_url, provider, model, status, owner_key_id, logs, result, error,
                created_at, started_at, completed_at",
        )
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to claim generation job").with_source(e))?;

        row.map(row_to_job).transpose()
    }

    /// Append one log line to a job, retrying the compare-and-swap up to
    /// [`APPEND_LOG_MAX_RETRIES`] times on a concurrent writer race.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Conflict`] if the CAS never lands, or
    /// [`ErrorCode::Internal`] on database failure.
    pub async fn append_job_log(&self, id: Uuid, line: &str) -> Result<(), AgpError> {
        for _ in 0..APPEND_LOG_MAX_RETRIES {
            let current: Option<String> =
                sqlx::query_scalar("SELECT logs FROM generation_jobs WHERE id = ?1")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to read job logs").with_source(e))?;

            let Some(current) = current else {
                return Err(AgpError::new(ErrorCode::Internal, "generation job not found"));
            };

            let mut logs: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
            logs.push(line.to_string());
            let updated = serde_json::to_string(&logs).unwrap_or_default();

            let result = sqlx::query("UPDATE generation_jobs SET logs = ?1 WHERE id = ?2 AND logs = ?3")
                .bind(&updated)
                .bind(id.to_string())
                .bind(&current)
                .execute(&self.pool)
                .await
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to append job log").with_source(e))?;

            if result.rows_affected() == 1 {
                return Ok(());
            }
        }
        Err(AgpError::new(ErrorCode::Conflict, "exceeded retries appending to generation job log"))
    }

    /// Mark a job `complete` with its result payload.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn complete_job(&self, id: Uuid, result: serde_json::Value) -> Result<(), AgpError> {
        sqlx::query(
            "UPDATE generation_jobs SET status = 'complete', result = ?1, completed_at = ?2 WHERE id = ?3",
        )
        .bind(serde_json::to_string(&result).unwrap_or_default())
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to complete generation job").with_source(e))?;
        Ok(())
    }

    /// Mark a job `failed` with an error message.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn fail_job(&self, id: Uuid, error: &str) -> Result<(), AgpError> {
        sqlx::query("UPDATE generation_jobs SET status = 'failed', error = ?1, completed_at = ?2 WHERE id = ?3")
            .bind(error)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to fail generation job").with_source(e))?;
        Ok(())
    }

    /// Fail every job left `running` from a previous process, called once at startup before the worker loop
    /// begins claiming new work.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn recover_stale_jobs(&self) -> Result<u64, AgpError> {
        let result = sqlx::query(
            "UPDATE generation_jobs SET status = 'failed', error = ?1, completed_at = ?2 WHERE status = 'running'",
        )
        .bind(ORPHANED_BY_RESTART)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to recover stale generation jobs").with_source(e))?;
        Ok(result.rows_affected())
    }

    /// Paginate jobs newest-first by `(created_at, id)`, optionally scoped
    /// to one owner.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn list_jobs(
        &self,
        owner_key_id: Option<&str>,
        limit: i64,
        before: Option<(chrono::DateTime<chrono::Utc>, Uuid)>,
    ) -> Result<Vec<GenerationJob>, AgpError> {
        let (before_ts, before_id) = before
            .map(|(ts, id)| (Some(ts.to_rfc3339()), Some(id.to_string())))
            .unwrap_or((None, None));

        let rows = sqlx::query(
            "SELECT id, platform, docs_url, provider, model, status, owner_key_id, logs, result, error,
                created_at, started_at, completed_at
             FROM generation_jobs
             WHERE (?1 IS NULL OR owner_key_id = ?1)
               AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND id < ?3))
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )
        .bind(owner_key_id)
        .bind(&before_ts)
        .bind(&before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to list generation jobs").with_source(e))?;

        rows.into_iter().map(row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_queue() -> JobQueue {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        JobQueue::new(pool)
    }

    #[tokio::test]
    async fn create_then_claim_moves_to_running() {
        let queue = memory_queue().await;
        queue.create_job("stripe", None, None, None, Some("owner-1".to_string())).await.unwrap();

        let claimed = queue.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_is_empty() {
        let queue = memory_queue().await;
        assert!(queue.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_oldest_first() {
        let queue = memory_queue().await;
        let first = queue.create_job("stripe", None, None, None, None).await.unwrap();
        queue.create_job("github", None, None, None, None).await.unwrap();

        let claimed = queue.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn append_job_log_accumulates_lines() {
        let queue = memory_queue().await;
        let job = queue.create_job("stripe", None, None, None, None).await.unwrap();
        queue.append_job_log(job.id, "starting").await.unwrap();
        queue.append_job_log(job.id, "generating").await.unwrap();

        let jobs = queue.list_jobs(None, 10, None).await.unwrap();
        assert_eq!(jobs[0].logs, vec!["starting".to_string(), "generating".to_string()]);
    }

    #[tokio::test]
    async fn complete_then_fail_update_terminal_status() {
        let queue = memory_queue().await;
        let job = queue.create_job("stripe", None, None, None, None).await.unwrap();
        queue.complete_job(job.id, serde_json::json!({"ok": true})).await.unwrap();

        let jobs = queue.list_jobs(None, 10, None).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert_eq!(jobs[0].result, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn recover_stale_jobs_fails_orphaned_running_rows() {
        let queue = memory_queue().await;
        queue.create_job("stripe", None, None, None, None).await.unwrap();
        queue.claim_next_job().await.unwrap();

        let recovered = queue.recover_stale_jobs().await.unwrap();
        assert_eq!(recovered, 1);

        let jobs = queue.list_jobs(None, 10, None).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error.as_deref(), Some(ORPHANED_BY_RESTART));
    }

    #[tokio::test]
    async fn list_jobs_scopes_to_owner() {
        let queue = memory_queue().await;
        queue.create_job("stripe", None, None, None, Some("owner-1".to_string())).await.unwrap();
        queue.create_job("github", None, None, None, Some("owner-2".to_string())).await.unwrap();

        let jobs = queue.list_jobs(Some("owner-1"), 10, None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].platform, "stripe");
    }
}
