// SPDX-License-Identifier: MIT OR Apache-2.0
//! The AGP daemon: HTTP surface wiring every other workspace crate into
//! one running gateway.
//!
//! An `Arc<AppState>`-based Axum router built by [`build_app`], a
//! request-id/logging/rate-limit/CORS middleware stack, and a local
//! [`error::ApiError`] since none of the domain crates depend on `axum`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Principal resolution (API key + session) extractors.
pub mod auth;
/// HTTP-shaped error wrapper around [`agp_error::AgpError`].
pub mod error;
/// Default (unconfigured) adapter-generation backend.
pub mod generator;
/// Request-id, logging, per-caller rate limiting, and CORS middleware.
pub mod middleware;
/// Route handlers, grouped by resource.
pub mod routes;

use agp_adapters::write_bundled_adapters;
use agp_audit::AuditChain;
use agp_config::ServerConfig;
use agp_crypto::kms::{KmsBackend, ManagedKms, MockKms};
use agp_error::{AgpError, ErrorCode};
use agp_gateway::{GatewayService, IdempotencyCache};
use agp_jobqueue::worker::{spawn_generation_worker, WorkerHandle};
use agp_jobqueue::JobQueue;
use agp_policy::PolicyEngine;
use agp_registry::{bundled::seed_bundled_adapters, AdapterRegistry};
use agp_store::{BusinessStore, TransactionStore};
use agp_telemetry::MetricsCollector;
use agp_vault::{AppCredentialStore, CredentialVault};
use axum::extract::FromRef;
use axum::middleware as axum_middleware;
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use middleware::{request_id_middleware, CorsConfig, RateLimiter, RequestLogger};

/// Shared state every route handler is given via `axum::extract::State`.
pub struct AppState {
    /// Validated runtime configuration.
    pub config: ServerConfig,
    /// Shared SQLite pool.
    pub pool: SqlitePool,
    /// Live adapter registry.
    pub registry: Arc<AdapterRegistry>,
    /// Per-user credential vault.
    pub vault: CredentialVault,
    /// Per-service OAuth app credential store.
    pub app_credentials: AppCredentialStore,
    /// Hash-chained audit log.
    pub audit: AuditChain,
    /// Owner-scoped business profile store.
    pub business_store: BusinessStore,
    /// Transaction record store.
    pub transaction_store: TransactionStore,
    /// In-process adapter call/job metrics.
    pub telemetry: MetricsCollector,
    /// Verb orchestration service.
    pub gateway: GatewayService,
    /// Confirmation-token policy gate for `execute`.
    pub policy: PolicyEngine,
    /// Durable `execute` replay cache.
    pub idempotency: IdempotencyCache,
    /// Generation job queue.
    pub job_queue: Arc<JobQueue>,
}

impl FromRef<Arc<AppState>> for SqlitePool {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.pool.clone()
    }
}

impl FromRef<Arc<AppState>> for ServerConfig {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.config.clone()
    }
}

/// Select the KMS backend per `config`: the mock backend when
/// `kms_mock_secret` is configured (local/dev), otherwise the managed
/// backend keyed by `kms_key_id`.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] if neither is configured.
pub fn select_kms_backend(config: &ServerConfig) -> Result<Arc<dyn KmsBackend>, AgpError> {
    if let Some(secret) = &config.kms_mock_secret {
        return Ok(Arc::new(MockKms::new(secret)));
    }
    Ok(Arc::new(ManagedKms::new(config.kms_key_id.clone())))
}

/// Build the full [`AppState`]: open the database, seed bundled adapters,
/// restore the registry, and wire every dependent crate together.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] if the database, registry, or adapter
/// seeding fails.
pub async fn build_state(config: ServerConfig) -> Result<Arc<AppState>, AgpError> {
    let pool = agp_db::connect(&config.database_url).await?;
    let kms = select_kms_backend(&config)?;

    write_bundled_adapters(&config.bundled_dir)?;

    let registry = Arc::new(AdapterRegistry::new(
        pool.clone(),
        config.bundled_dir.clone(),
        config.runtime_dir.clone(),
    ));
    seed_bundled_adapters(&registry).await?;
    registry.restore_from_db().await?;
    registry.load_untracked_runtime_files()?;

    let vault = CredentialVault::new(pool.clone(), kms.clone());
    let app_credentials = AppCredentialStore::new(pool.clone(), kms);
    let audit = AuditChain::new(pool.clone());
    let business_store = BusinessStore::new(pool.clone());
    let transaction_store = TransactionStore::new(pool.clone());
    let telemetry = MetricsCollector::new();
    let idempotency = IdempotencyCache::new(pool.clone());
    let policy = PolicyEngine::new();
    let job_queue = Arc::new(JobQueue::new(pool.clone()));

    let gateway = GatewayService::new(
        registry.clone(),
        vault.clone(),
        app_credentials.clone(),
        audit.clone(),
        business_store.clone(),
        transaction_store.clone(),
        telemetry.clone(),
        Duration::from_millis(config.adapter_timeout_ms),
    );

    Ok(Arc::new(AppState {
        config,
        pool,
        registry,
        vault,
        app_credentials,
        audit,
        business_store,
        transaction_store,
        telemetry,
        gateway,
        policy,
        idempotency,
        job_queue,
    }))
}

/// Spawn the background generation worker over `state`'s job queue and
/// registry, using the daemon's default (unconfigured) generator.
#[must_use]
pub fn spawn_worker(state: &Arc<AppState>) -> WorkerHandle {
    spawn_generation_worker(
        state.job_queue.clone(),
        state.registry.clone(),
        Arc::new(generator::UnconfiguredGenerator),
        Duration::from_secs(state.config.generation_poll_secs),
    )
}

/// Build the Axum router with every AGP route, the request-id/logging
/// middleware, per-caller rate limiting, and CORS.
#[must_use]
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsConfig::new(state.config.cors_origins.clone()).to_cors_layer();
    let rate_limiter = RateLimiter::new(120, Duration::from_secs(60));

    routes::router()
        .layer(axum_middleware::from_fn(RequestLogger::layer))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(rate_limiter.into_layer())
        .layer(cors)
        .with_state(state)
}
