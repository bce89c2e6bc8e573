// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway service: the orchestration seam that turns a `(business,
//! caller, input)` triple into a resolved adapter call
//!
//! [`GatewayService`] owns no HTTP concerns — it is called from
//! `agp-daemon`'s handlers after auth, idempotency, and policy have
//! already been applied. Its three verb entry points share one flow:
//! resolve a principal-scoped business, resolve a registered adapter,
//! construct a per-call [`AdapterContext`] wired to the vault/OAuth/audit
//! credential path, and record the resulting [`Transaction`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Durable replay cache for `Idempotency-Key` requests.
pub mod idempotency;

pub use idempotency::IdempotencyCache;

use agp_adapter::context::{AdapterContext, CredentialResolver};
use agp_adapter::Adapter;
use agp_audit::AuditChain;
use agp_core::manifest::AdapterManifest;
use agp_core::{Business, CredentialPayload, Transaction, Verb};
use agp_error::{AgpError, ErrorCode};
use agp_oauth::refresh_if_needed;
use agp_registry::AdapterRegistry;
use agp_store::{BusinessStore, TransactionStore};
use agp_telemetry::{AdapterCallMetrics, MetricsCollector};
use agp_vault::{AppCredentialStore, CredentialVault};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Default per-adapter execution timeout, mirrored from `agp-config` so
/// this crate does not need to depend on it directly.
pub const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 30_000;

/// Cap applied to an adapter error's message before it is stored on the
/// failed transaction / surfaced to the caller ( step 6).
const ADAPTER_ERROR_MAX_CHARS: usize = 500;

/// Admin principal id, treated specially by [`Transaction::is_visible_to`]
/// and as the default owner on the bootstrap path.
pub const ADMIN_PRINCIPAL: &str = "admin";

/// Result of one `discover`/`query`/`execute` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerbResult {
    /// The recorded transaction's id.
    pub transaction_id: Uuid,
    /// Always `"succeeded"` — failures return `Err` instead.
    pub status: &'static str,
    /// The adapter's response payload.
    pub data: Value,
}

/// Wires a vault + proactive OAuth refresh + audit log together as the
/// [`CredentialResolver`] every [`AdapterContext`] built by
/// [`GatewayService`] uses.
///
/// `CredentialNotFound` is translated into `Ok(None)` here (per spec
/// `4.I` step 5) so the adapter context can decide whether the *caller*
/// treats a missing credential as fatal (an authenticated host always
/// does, via [`AdapterContext::fetch`]).
struct GatewayCredentialResolver {
    vault: CredentialVault,
    app_credentials: AppCredentialStore,
    audit: AuditChain,
    manifest: AdapterManifest,
    user_id: String,
    execution_id: String,
}

#[async_trait]
impl CredentialResolver for GatewayCredentialResolver {
    async fn resolve(&self, force_refresh: bool) -> Result<Option<CredentialPayload>, AgpError> {
        if let Some(oauth_config) = &self.manifest.auth.oauth {
            refresh_if_needed(
                &self.vault,
                &self.app_credentials,
                &self.audit,
                &self.user_id,
                &self.manifest.platform,
                oauth_config,
                force_refresh,
            )
            .await?;
        }

        let payload = match self
            .vault
            .retrieve_credential(&self.user_id, &self.manifest.platform)
            .await
        {
            Ok(payload) => payload,
            Err(e) if e.code == ErrorCode::CredentialNotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        self.audit
            .log_audit(
                Some(&self.user_id),
                Some(&self.manifest.platform),
                "credential_retrieved",
                Some(&self.execution_id),
                None,
                None,
            )
            .await;

        Ok(Some(payload))
    }
}

/// Orchestrates one AGP verb call end to end.
pub struct GatewayService {
    registry: Arc<AdapterRegistry>,
    vault: CredentialVault,
    app_credentials: AppCredentialStore,
    audit: AuditChain,
    business_store: BusinessStore,
    transaction_store: TransactionStore,
    telemetry: MetricsCollector,
    adapter_timeout: Duration,
    /// Tier 2 of business resolution ( step 3): ephemeral
    /// profiles resolved once via the registry-only fallback are cached
    /// here so repeated calls against the same un-persisted business id
    /// see a stable profile instead of re-synthesizing one each time.
    ephemeral_businesses: RwLock<HashMap<String, Business>>,
}

impl GatewayService {
    /// Construct a gateway service over its dependency set.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AdapterRegistry>,
        vault: CredentialVault,
        app_credentials: AppCredentialStore,
        audit: AuditChain,
        business_store: BusinessStore,
        transaction_store: TransactionStore,
        telemetry: MetricsCollector,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            vault,
            app_credentials,
            audit,
            business_store,
            transaction_store,
            telemetry,
            adapter_timeout,
            ephemeral_businesses: RwLock::new(HashMap::new()),
        }
    }

    /// Answer `discover` for `business_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn discover(&self, business_id: &str, caller_id: &str) -> Result<VerbResult, AgpError> {
        self.call(Verb::Discover, business_id, caller_id, Value::Null).await
    }

    /// Answer `query` for `business_id` with `input`.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn query(&self, business_id: &str, caller_id: &str, input: Value) -> Result<VerbResult, AgpError> {
        self.call(Verb::Query, business_id, caller_id, input).await
    }

    /// Answer `execute` for `business_id` with `input`.
    ///
    /// Idempotency replay and policy confirmation are handled by the
    /// caller (the daemon's HTTP layer) before this is invoked; this
    /// method only performs the underlying adapter call and transaction
    /// bookkeeping.
    ///
    /// # Errors
    ///
    /// See [`Self::call`].
    pub async fn execute(&self, business_id: &str, caller_id: &str, input: Value) -> Result<VerbResult, AgpError> {
        self.call(Verb::Execute, business_id, caller_id, input).await
    }

    /// Fetch a previously recorded transaction, if `caller_id` may see it.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Internal`] on database failure.
    pub async fn status(&self, transaction_id: Uuid, caller_id: &str) -> Result<Option<Transaction>, AgpError> {
        self.transaction_store.get_visible(transaction_id, caller_id).await
    }

    async fn call(&self, verb: Verb, business_id: &str, caller_id: &str, input: Value) -> Result<VerbResult, AgpError> {
        let owner_key_id = if caller_id.is_empty() { ADMIN_PRINCIPAL } else { caller_id };

        let transaction = Transaction::new_pending(verb, business_id, input.clone(), owner_key_id, chrono::Utc::now());
        self.transaction_store.create(&transaction).await?;

        match self.invoke(verb, business_id, owner_key_id, transaction.id.to_string(), input).await {
            Ok(data) => {
                self.transaction_store.mark_succeeded(transaction.id, data.clone()).await?;
                Ok(VerbResult {
                    transaction_id: transaction.id,
                    status: "succeeded",
                    data,
                })
            }
            Err(e) => {
                self.transaction_store.mark_failed(transaction.id, &e.message).await?;
                Err(e)
            }
        }
    }

    async fn invoke(
        &self,
        verb: Verb,
        business_id: &str,
        owner_key_id: &str,
        execution_id: String,
        input: Value,
    ) -> Result<Value, AgpError> {
        let business = self.resolve_business(business_id, owner_key_id).await?;

        let entry = self
            .registry
            .resolve(&business.platform, Some(owner_key_id))
            .ok_or_else(|| {
                AgpError::new(ErrorCode::AdapterNotFound, "no adapter registered for this business's platform")
                    .with_context("platform", &business.platform)
            })?;

        let manifest = entry.adapter.manifest().clone();
        let resolver = Arc::new(GatewayCredentialResolver {
            vault: self.vault.clone(),
            app_credentials: self.app_credentials.clone(),
            audit: self.audit.clone(),
            manifest: manifest.clone(),
            user_id: owner_key_id.to_string(),
            execution_id: execution_id.clone(),
        });
        let ctx = AdapterContext::new(manifest, resolver, self.adapter_timeout);

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.adapter_timeout, self.run_verb(verb, &entry.adapter, &ctx, input)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Err(_) => Err(AgpError::new(
                ErrorCode::AdapterExecutionTimeout,
                "adapter call exceeded its execution timeout",
            )
            .with_context("platform", &business.platform)),
            Ok(Err(e)) if e.code == ErrorCode::AdapterExecutionTimeout || e.code == ErrorCode::DomainNotAllowed || e.code == ErrorCode::CredentialNotFound => {
                Err(e)
            }
            Ok(Err(e)) => Err(AgpError::truncated(ErrorCode::AdapterOperation, &e.message, ADAPTER_ERROR_MAX_CHARS)
                .with_context("platform", &business.platform)),
            Ok(Ok(value)) => Ok(value),
        };

        self.telemetry.record_call(AdapterCallMetrics {
            platform: business.platform.clone(),
            verb: verb_label(verb).to_string(),
            duration_ms,
            succeeded: result.is_ok(),
            timed_out: matches!(&result, Err(e) if e.code == ErrorCode::AdapterExecutionTimeout),
        });

        result
    }

    async fn run_verb(
        &self,
        verb: Verb,
        adapter: &Arc<dyn Adapter>,
        ctx: &AdapterContext,
        input: Value,
    ) -> Result<Value, AgpError> {
        match verb {
            Verb::Discover => adapter.discover(ctx).await,
            Verb::Query => adapter.query(ctx, input).await,
            Verb::Execute => adapter.execute(ctx, input).await,
        }
    }

    /// Resolve a business
    /// an active persisted row, then a previously-synthesized ephemeral
    /// profile, then a fresh ephemeral profile for a platform the
    /// registry can still serve (covers adapters exercised without ever
    /// creating a business row — generation previews, bundled demos).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::BusinessNotFound`] if none of the three tiers
    /// resolve.
    async fn resolve_business(&self, business_id: &str, owner_key_id: &str) -> Result<Business, AgpError> {
        if let Some(business) = self.business_store.get_active(business_id).await? {
            return Ok(business);
        }

        if let Some(business) = self
            .ephemeral_businesses
            .read()
            .expect("ephemeral business cache lock poisoned")
            .get(business_id)
            .cloned()
        {
            return Ok(business);
        }

        if self.registry.resolve(business_id, Some(owner_key_id)).is_some() {
            let business = Business {
                id: business_id.to_string(),
                owner_id: owner_key_id.to_string(),
                name: business_id.to_string(),
                platform: business_id.to_string(),
                location: None,
                description: None,
                category: None,
                preferences: None,
                status: agp_core::BusinessStatus::Active,
            };
            self.ephemeral_businesses
                .write()
                .expect("ephemeral business cache lock poisoned")
                .insert(business_id.to_string(), business.clone());
            return Ok(business);
        }

        Err(AgpError::new(ErrorCode::BusinessNotFound, "no business or adapter found for this id")
            .with_context("business_id", business_id))
    }
}

fn verb_label(verb: Verb) -> &'static str {
    match verb {
        Verb::Discover => "discover",
        Verb::Query => "query",
        Verb::Execute => "execute",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_adapter::descriptor::{AdapterDescriptor, HttpCallTemplate};
    use agp_core::manifest::{AuthConfig, AuthStrategy};
    use agp_crypto::MockKms;
    use agp_registry::{bundled::seed_bundled_adapters, Scope};
    use std::collections::BTreeMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn harness(
        server: &MockServer,
    ) -> (GatewayService, Arc<AdapterRegistry>, BusinessStore, tempfile::TempDir) {
        let pool = agp_db::connect("sqlite::memory:").await.unwrap();
        let kms = Arc::new(MockKms::new("test-secret"));
        let dir = tempfile::tempdir().unwrap();
        let bundled_dir = dir.path().join("bundled");
        let runtime_dir = dir.path().join("runtime");
        std::fs::create_dir_all(&bundled_dir).unwrap();
        std::fs::create_dir_all(&runtime_dir).unwrap();

        let descriptor = AdapterDescriptor {
            manifest: AdapterManifest {
                platform: "mock".into(),
                auth: AuthConfig {
                    strategy: AuthStrategy::None,
                    scopes: vec![],
                    header_name: None,
                    cookie_name: None,
                    oauth: None,
                },
                authenticated_domains: vec![],
                allowed_domains: vec![server.uri().strip_prefix("http://").unwrap().to_string()],
            },
            discover: None,
            query: HttpCallTemplate {
                method: "GET".into(),
                url_template: format!("{}/resource", server.uri()),
                query_params: BTreeMap::new(),
            },
            execute: None,
        };
        std::fs::write(
            bundled_dir.join("mock-1.0.0.json"),
            serde_json::to_string(&descriptor).unwrap(),
        )
        .unwrap();

        let registry = Arc::new(AdapterRegistry::new(pool.clone(), bundled_dir, runtime_dir));
        seed_bundled_adapters(&registry).await.unwrap();

        let business_store = BusinessStore::new(pool.clone());
        business_store
            .create(ADMIN_PRINCIPAL, "Mock Co", "mock", None, None, None, None)
            .await
            .unwrap();

        let service = GatewayService::new(
            registry.clone(),
            CredentialVault::new(pool.clone(), kms.clone()),
            AppCredentialStore::new(pool.clone(), kms),
            AuditChain::new(pool.clone()),
            business_store.clone(),
            TransactionStore::new(pool.clone()),
            MetricsCollector::new(),
            Duration::from_secs(5),
        );
        (service, registry, business_store, dir)
    }

    #[tokio::test]
    async fn query_resolves_business_and_adapter_and_records_a_succeeded_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;
        let (service, _registry, business_store, _dir) = harness(&server).await;

        let businesses = business_store.list_public().await.unwrap();
        let business_id = businesses[0].id.clone();

        let result = service.query(&business_id, ADMIN_PRINCIPAL, Value::Null).await.unwrap();
        assert_eq!(result.status, "succeeded");
        assert_eq!(result.data, serde_json::json!({"ok": true}));

        let tx = service.status(result.transaction_id, ADMIN_PRINCIPAL).await.unwrap().unwrap();
        assert_eq!(tx.status, agp_core::TransactionStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_business_is_not_found() {
        let server = MockServer::start().await;
        let (service, _registry, _business_store, _dir) = harness(&server).await;

        let err = service.query("nonexistent", ADMIN_PRINCIPAL, Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BusinessNotFound);
    }

    #[tokio::test]
    async fn registry_only_fallback_serves_a_business_with_no_persisted_row() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;
        let (service, _registry, _business_store, _dir) = harness(&server).await;

        // "mock" is a registered platform but was never turned into a
        // `businesses` row by this test.
        let result = service.query("mock", ADMIN_PRINCIPAL, Value::Null).await.unwrap();
        assert_eq!(result.status, "succeeded");
    }

    #[tokio::test]
    async fn adapter_not_found_when_no_platform_matches() {
        let server = MockServer::start().await;
        let (service, registry, _business_store, _dir) = harness(&server).await;
        registry.unregister("mock", &Scope::Public);

        let err = service.query("mock", ADMIN_PRINCIPAL, Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterNotFound);
    }

    #[tokio::test]
    async fn upstream_failure_marks_the_transaction_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (service, _registry, business_store, _dir) = harness(&server).await;

        let businesses = business_store.list_public().await.unwrap();
        let business_id = businesses[0].id.clone();

        let err = service.query(&business_id, ADMIN_PRINCIPAL, Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterOperation);
    }
}
