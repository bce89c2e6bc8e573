// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent worker loop that claims generation jobs and turns each into
//! a hot-loaded sandbox adapter.
//!
//! The actual LLM generation pipeline is out of scope here (spec
//! Non-goals); [`Generator`] is the seam a real implementation plugs into.

use crate::JobQueue;
use agp_core::adapter_record::SYSTEM_OWNER;
use agp_core::job::GenerationJob;
use agp_error::{AgpError, ErrorCode};
use agp_registry::{AdapterRegistry, Scope};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What a successful generation produced.
pub struct GenerationOutcome {
    /// Descriptor JSON source for the new sandbox adapter.
    pub adapter_source: String,
    /// Semver string for the generated adapter, if the generator assigns one.
    pub version: Option<String>,
    /// Optional interaction-profile document describing the generated
    /// adapter's typical call shapes, written alongside the descriptor.
    pub profile: Option<serde_json::Value>,
    /// Free-form runtime identifier the generator used (model name,
    /// pipeline version), recorded in the job result for diagnostics.
    pub runtime: Option<String>,
}

/// Receives one progress line at a time while a [`Generator`] runs.
/// `JobQueueLogger` is the concrete implementation the worker loop passes
/// in, serializing each line through [`JobQueue::append_job_log`].
#[async_trait]
pub trait JobLogger: Send + Sync {
    /// Record one progress line.
    async fn log(&self, line: String);
}

struct JobQueueLogger<'a> {
    queue: &'a JobQueue,
    job_id: Uuid,
}

#[async_trait]
impl JobLogger for JobQueueLogger<'_> {
    async fn log(&self, line: String) {
        if let Err(err) = self.queue.append_job_log(self.job_id, &line).await {
            tracing::warn!(error = %err, job_id = %self.job_id, "failed to append generation job log line");
        }
    }
}

/// Pluggable adapter-generation pipeline. Implementations talk to whatever
/// LLM provider the deployment configures; this crate only owns the queue,
/// the claim loop, and turning a successful run into a live adapter.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a new adapter for `job`, streaming progress lines through
    /// `log`.
    async fn generate(&self, job: &GenerationJob, log: &dyn JobLogger) -> Result<GenerationOutcome, AgpError>;
}

struct ExistingPublic {
    exists: bool,
}

async fn has_public_adapter(pool: &sqlx::SqlitePool, platform: &str) -> Result<ExistingPublic, AgpError> {
    let row = sqlx::query("SELECT 1 FROM adapters WHERE platform = ?1 AND status = 'public' LIMIT 1")
        .bind(platform)
        .fetch_optional(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to check for an existing public adapter").with_source(e))?;
    Ok(ExistingPublic { exists: row.is_some() })
}

async fn upsert_sandbox_record(
    pool: &sqlx::SqlitePool,
    platform: &str,
    owner_id: &str,
    file_path: &str,
    source: &str,
    version: Option<&str>,
) -> Result<(), AgpError> {
    let existing = sqlx::query("SELECT id FROM adapters WHERE platform = ?1 AND owner_id = ?2")
        .bind(platform)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to look up sandbox adapter row").with_source(e))?;

    let now = Utc::now().to_rfc3339();
    let hash = {
        use sha2::{Digest, Sha256};
        Sha256::digest(source.as_bytes()).iter().map(|b| format!("{b:02x}")).collect::<String>()
    };

    if let Some(row) = existing {
        let id: String = row.get("id");
        sqlx::query(
            "UPDATE adapters SET status = 'sandbox', file_path = ?1, source_code = ?2, source_hash = ?3,
                version = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .bind(file_path)
        .bind(source)
        .bind(&hash)
        .bind(version)
        .bind(&now)
        .bind(&id)
        .execute(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to update sandbox adapter row").with_source(e))?;
    } else {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO adapters
                (id, platform, owner_id, status, file_path, source_code, source_hash, version,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, 'sandbox', ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(&id)
        .bind(platform)
        .bind(owner_id)
        .bind(file_path)
        .bind(source)
        .bind(&hash)
        .bind(version)
        .bind(&now)
        .execute(pool)
        .await
        .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to insert sandbox adapter row").with_source(e))?;
    }
    Ok(())
}

async fn run_one_tick(queue: &JobQueue, registry: &AdapterRegistry, generator: &dyn Generator) -> Result<bool, AgpError> {
    let Some(job) = queue.claim_next_job().await? else {
        return Ok(false);
    };

    let owner_id = job.owner_key_id.clone().unwrap_or_else(|| SYSTEM_OWNER.to_string());

    if has_public_adapter(registry.pool(), &job.platform).await?.exists {
        queue.fail_job(job.id, "a public adapter already exists for this platform").await?;
        return Ok(true);
    }

    let logger = JobQueueLogger { queue, job_id: job.id };

    match generator.generate(&job, &logger).await {
        Ok(outcome) => {
            let runtime_relative = format!("{}-{owner_id}.json", job.platform);
            let runtime_path = registry.runtime_path(&runtime_relative)?;
            if let Some(parent) = runtime_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to create runtime directory").with_source(e))?;
            }
            std::fs::write(&runtime_path, &outcome.adapter_source)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to write generated adapter source").with_source(e))?;

            let profile_path = if let Some(profile) = &outcome.profile {
                let relative = format!("{}-{owner_id}-profile.json", job.platform);
                let path = registry.runtime_path(&relative)?;
                let body = serde_json::to_string_pretty(profile).unwrap_or_default();
                std::fs::write(&path, body)
                    .map_err(|e| AgpError::new(ErrorCode::Internal, "failed to write adapter profile").with_source(e))?;
                Some(path.to_string_lossy().into_owned())
            } else {
                None
            };

            upsert_sandbox_record(
                registry.pool(),
                &job.platform,
                &owner_id,
                &runtime_path.to_string_lossy(),
                &outcome.adapter_source,
                outcome.version.as_deref(),
            )
            .await?;
            registry.hot_load(&job.platform, Scope::Sandbox(owner_id.clone()), &runtime_path)?;

            let result = serde_json::json!({
                "adapterPath": runtime_path.to_string_lossy(),
                "profilePath": profile_path,
                "attempts": 1,
                "runtime": outcome.runtime,
            });
            queue.complete_job(job.id, result).await?;
        }
        Err(err) => {
            queue.fail_job(job.id, &err.message).await?;
        }
    }

    Ok(true)
}

/// Cooperative handle controlling a spawned worker loop.
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the loop to exit after its current tick and await it.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.task.await;
    }
}

/// Spawn the persistent generation worker loop: claims jobs every
/// `poll_interval` (plus an immediate first tick), reentry-guarded so a
/// slow tick never overlaps the next timer fire.
pub fn spawn_generation_worker(
    queue: Arc<JobQueue>,
    registry: Arc<AdapterRegistry>,
    generator: Arc<dyn Generator>,
    poll_interval: Duration,
) -> WorkerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_task = stop.clone();
    let running = Arc::new(tokio::sync::Mutex::new(()));

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if stop_for_task.load(Ordering::SeqCst) {
                break;
            }

            {
                let _guard = running.lock().await;
                loop {
                    match run_one_tick(&queue, &registry, generator.as_ref()).await {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(err) => {
                            tracing::error!(error = %err, "generation worker tick failed");
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_stop(&stop_for_task) => break,
            }
        }
    });

    WorkerHandle { stop, task }
}

async fn wait_for_stop(flag: &Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_core::job::JobStatus;
    use std::sync::Mutex;

    struct StubGenerator {
        outcome: Mutex<Option<Result<GenerationOutcome, AgpError>>>,
    }

    #[async_trait]
    impl Generator for StubGenerator {
        async fn generate(&self, _job: &GenerationJob, log: &dyn JobLogger) -> Result<GenerationOutcome, AgpError> {
            log.log("generating".to_string()).await;
            self.outcome.lock().unwrap().take().expect("generate called more than once in this test")
        }
    }

    async fn test_registry(tmp: &std::path::Path) -> (Arc<JobQueue>, Arc<AdapterRegistry>) {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        let bundled = tmp.join("bundled");
        let runtime = tmp.join("runtime");
        std::fs::create_dir_all(&bundled).unwrap();
        std::fs::create_dir_all(&runtime).unwrap();
        let registry = Arc::new(AdapterRegistry::new(pool.clone(), bundled, runtime));
        (Arc::new(JobQueue::new(pool)), registry)
    }

    #[tokio::test]
    async fn successful_generation_hot_loads_a_sandbox_adapter() {
        let tmp = tempfile::tempdir().unwrap();
        let (queue, registry) = test_registry(tmp.path()).await;
        let job = queue.create_job("stripe", None, None, None, Some("owner-1".to_string())).await.unwrap();

        let descriptor = super::tests_support::minimal_descriptor_json("stripe");
        let generator = Arc::new(StubGenerator {
            outcome: Mutex::new(Some(Ok(GenerationOutcome {
                adapter_source: descriptor,
                version: Some("1.0.0".to_string()),
                profile: None,
                runtime: Some("test-model".to_string()),
            }))),
        });

        run_one_tick(&queue, &registry, generator.as_ref()).await.unwrap();

        let jobs = queue.list_jobs(Some("owner-1"), 10, None).await.unwrap();
        assert_eq!(jobs[0].id, job.id);
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert!(registry.resolve("stripe", Some("owner-1")).is_some());
    }

    #[tokio::test]
    async fn skips_generation_when_platform_already_has_a_public_adapter() {
        let tmp = tempfile::tempdir().unwrap();
        let (queue, registry) = test_registry(tmp.path()).await;
        sqlx::query(
            "INSERT INTO adapters (id, platform, owner_id, status, file_path, created_at, updated_at)
             VALUES ('id-1', 'stripe', 'system', 'public', 'x', 'now', 'now')",
        )
        .execute(registry.pool())
        .await
        .unwrap();

        let job = queue.create_job("stripe", None, None, None, Some("owner-1".to_string())).await.unwrap();
        let generator = Arc::new(StubGenerator { outcome: Mutex::new(None) });

        run_one_tick(&queue, &registry, generator.as_ref()).await.unwrap();

        let jobs = queue.list_jobs(Some("owner-1"), 10, None).await.unwrap();
        assert_eq!(jobs[0].id, job.id);
        assert_eq!(jobs[0].status, JobStatus::Failed);
    }
}
