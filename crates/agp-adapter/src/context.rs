// SPDX-License-Identifier: MIT OR Apache-2.0

//! `AdapterContext::fetch`: the single gate every outbound adapter request
//! passes through.
//!
//! The contract, in order: parse the target URL, classify its host against
//! the adapter's manifest and reject anything not explicitly allow-listed,
//! resolve a credential (single-flight, cached per context) only when the
//! host demands one, inject it per the configured [`AuthStrategy`], race
//! the whole attempt against a timeout, and — for strategies that support
//! it — retry exactly once on a `401` with a forced credential refresh.

use agp_core::manifest::{AuthStrategy, DomainClass};
use agp_core::{AdapterManifest, CredentialPayload};
use agp_error::{AgpError, ErrorCode};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Resolves credentials for one `(user, service)` pair on demand.
///
/// Implementations typically wrap the credential vault plus a proactive
/// OAuth refresh call; `force_refresh` is set on the 401-retry path and
/// should bypass any "not yet due" shortcut and force a live refresh.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credential, or `None` if the caller has not connected
    /// this service.
    async fn resolve(&self, force_refresh: bool) -> Result<Option<CredentialPayload>, AgpError>;
}

/// A resolver that never has a credential. Used for `AuthStrategy::None`
/// adapters and in tests.
pub struct NoCredentialResolver;

#[async_trait]
impl CredentialResolver for NoCredentialResolver {
    async fn resolve(&self, _force_refresh: bool) -> Result<Option<CredentialPayload>, AgpError> {
        Ok(None)
    }
}

/// An outbound HTTP request as seen by [`AdapterContext::fetch`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Caller-supplied headers. Auth headers are injected on top of these.
    pub headers: HeaderMap,
    /// JSON request body, if any.
    pub body: Option<Value>,
}

impl FetchRequest {
    /// Construct a `GET` request with no body or extra headers.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// The result of a [`AdapterContext::fetch`] call.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers as `(name, value)` pairs.
    pub headers: Vec<(String, String)>,
    /// Response body, parsed as JSON when possible and wrapped as a JSON
    /// string otherwise.
    pub body: Value,
}

impl FetchResponse {
    /// Returns `true` if the status is in the `2xx` range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    async fn from_reqwest(response: reqwest::Response) -> Result<Self, AgpError> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AgpError::new(ErrorCode::AdapterOperation, "failed to read response body").with_source(e))?;
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        Ok(Self { status, headers, body })
    }
}

/// Per-request execution context for one [`crate::Adapter`] invocation.
///
/// Holds the manifest used for domain classification, a credential
/// resolver, a single-flight credential cache (reset on forced refresh),
/// and the per-request timeout budget.
pub struct AdapterContext {
    manifest: AdapterManifest,
    resolver: std::sync::Arc<dyn CredentialResolver>,
    credential_cell: Mutex<std::sync::Arc<OnceCell<Option<CredentialPayload>>>>,
    http: reqwest::Client,
    timeout: Duration,
}

impl AdapterContext {
    /// Build a context for one adapter invocation.
    #[must_use]
    pub fn new(
        manifest: AdapterManifest,
        resolver: std::sync::Arc<dyn CredentialResolver>,
        timeout: Duration,
    ) -> Self {
        Self {
            manifest,
            resolver,
            credential_cell: Mutex::new(std::sync::Arc::new(OnceCell::new())),
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// The manifest this context enforces domain/auth rules from.
    #[must_use]
    pub fn manifest(&self) -> &AdapterManifest {
        &self.manifest
    }

    /// The remaining execution budget for this context's adapter call.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn resolve_credential(&self, force: bool) -> Result<Option<CredentialPayload>, AgpError> {
        let cell = {
            let mut guard = self.credential_cell.lock().expect("credential cache lock poisoned");
            if force {
                *guard = std::sync::Arc::new(OnceCell::new());
            }
            guard.clone()
        };
        cell.get_or_try_init(|| async { self.resolver.resolve(force).await })
            .await
            .cloned()
    }

    /// Perform one gated HTTP request: classify the host, resolve and
    /// inject a credential if the host requires one, race the whole
    /// attempt against this context's timeout, and retry once on a `401`
    /// when [`AuthStrategy::retries_on_401`] allows it.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::DomainNotAllowed`] if the request's host is in
    ///   neither the manifest's authenticated nor allowed domain list.
    /// - [`ErrorCode::CredentialNotFound`] if the host requires a
    ///   credential the caller has not connected.
    /// - [`ErrorCode::AdapterExecutionTimeout`] if the attempt (including
    ///   any 401 retry) does not finish within [`Self::timeout`].
    /// - [`ErrorCode::AdapterOperation`] for transport-level failures.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, AgpError> {
        match tokio::time::timeout(self.timeout, self.fetch_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(AgpError::new(
                ErrorCode::AdapterExecutionTimeout,
                "adapter request exceeded its execution timeout",
            )),
        }
    }

    async fn fetch_inner(&self, request: FetchRequest) -> Result<FetchResponse, AgpError> {
        let url = Url::parse(&request.url)
            .map_err(|e| AgpError::new(ErrorCode::Validation, "invalid adapter request URL").with_source(e))?;
        let host = url
            .host_str()
            .ok_or_else(|| AgpError::new(ErrorCode::Validation, "adapter request URL has no host"))?
            .to_string();

        let class = self.manifest.classify_domain(&host);
        if class == DomainClass::Rejected {
            return Err(AgpError::new(
                ErrorCode::DomainNotAllowed,
                format!("host '{host}' is not in this adapter's domain allow-list"),
            )
            .with_context("platform", &self.manifest.platform));
        }
        let needs_auth = class == DomainClass::Authenticated;

        let response = self.attempt(&request, needs_auth, false).await?;

        if response.status == StatusCode::UNAUTHORIZED
            && needs_auth
            && self.manifest.auth.strategy.retries_on_401()
        {
            return match self.attempt(&request, needs_auth, true).await {
                Ok(retry) => FetchResponse::from_reqwest(retry).await,
                Err(_) => FetchResponse::from_reqwest(response).await,
            };
        }

        FetchResponse::from_reqwest(response).await
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        needs_auth: bool,
        force_refresh: bool,
    ) -> Result<reqwest::Response, AgpError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        if needs_auth {
            let credential = self.resolve_credential(force_refresh).await?;
            let credential = credential.ok_or_else(|| {
                AgpError::new(
                    ErrorCode::CredentialNotFound,
                    "adapter request requires a credential that has not been connected",
                )
                .with_context("platform", &self.manifest.platform)
            })?;
            builder = inject_auth(builder, &self.manifest, &credential)?;
        }

        builder
            .send()
            .await
            .map_err(|e| AgpError::new(ErrorCode::AdapterOperation, "adapter fetch failed").with_source(e))
    }
}

fn inject_auth(
    builder: reqwest::RequestBuilder,
    manifest: &AdapterManifest,
    credential: &CredentialPayload,
) -> Result<reqwest::RequestBuilder, AgpError> {
    let missing = || {
        AgpError::new(
            ErrorCode::CredentialMissingField,
            "stored credential is missing the field this auth strategy requires",
        )
        .with_context("platform", &manifest.platform)
    };

    match manifest.auth.strategy {
        AuthStrategy::None => Ok(builder),
        AuthStrategy::Bearer | AuthStrategy::ClientCredentials => {
            let token = credential.access_token.as_ref().ok_or_else(missing)?;
            Ok(builder.bearer_auth(token))
        }
        AuthStrategy::ApiKeyHeader => {
            let key = credential.api_key.as_ref().ok_or_else(missing)?;
            let header_name = manifest
                .auth
                .header_name
                .clone()
                .unwrap_or_else(|| "X-Api-Key".to_string());
            let name = HeaderName::from_bytes(header_name.as_bytes())
                .map_err(|e| AgpError::new(ErrorCode::Internal, "invalid api key header name").with_source(e))?;
            let value = HeaderValue::from_str(key)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "invalid api key header value").with_source(e))?;
            Ok(builder.header(name, value))
        }
        AuthStrategy::Basic => {
            let username = credential.username.as_ref().ok_or_else(missing)?;
            let password = credential.password.clone();
            Ok(builder.basic_auth(username, password))
        }
        AuthStrategy::Cookie => {
            let cookie_name = manifest
                .auth
                .cookie_name
                .clone()
                .or_else(|| credential.cookie_name.clone())
                .ok_or_else(missing)?;
            let cookie_value = credential.cookie_value.as_ref().ok_or_else(missing)?;
            Ok(builder.header(COOKIE, format!("{cookie_name}={cookie_value}")))
        }
        AuthStrategy::Custom => {
            let header_name = manifest.auth.header_name.clone().ok_or_else(missing)?;
            let value = credential
                .api_key
                .as_ref()
                .or(credential.access_token.as_ref())
                .ok_or_else(missing)?;
            let name = HeaderName::from_bytes(header_name.as_bytes())
                .map_err(|e| AgpError::new(ErrorCode::Internal, "invalid custom header name").with_source(e))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| AgpError::new(ErrorCode::Internal, "invalid custom header value").with_source(e))?;
            Ok(builder.header(name, header_value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_core::manifest::{AuthConfig, OAuthConfig, TokenContentType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bearer_manifest(domain: &str) -> AdapterManifest {
        AdapterManifest {
            platform: "mock".into(),
            auth: AuthConfig {
                strategy: AuthStrategy::Bearer,
                scopes: vec![],
                header_name: None,
                cookie_name: None,
                oauth: None,
            },
            authenticated_domains: vec![domain.to_string()],
            allowed_domains: vec![],
        }
    }

    struct FixedResolver(Option<CredentialPayload>);

    #[async_trait]
    impl CredentialResolver for FixedResolver {
        async fn resolve(&self, _force_refresh: bool) -> Result<Option<CredentialPayload>, AgpError> {
            Ok(self.0.clone())
        }
    }

    struct CountingResolver {
        calls: AtomicUsize,
        tokens: Vec<&'static str>,
    }

    #[async_trait]
    impl CredentialResolver for CountingResolver {
        async fn resolve(&self, _force_refresh: bool) -> Result<Option<CredentialPayload>, AgpError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let token = self.tokens.get(idx).copied().unwrap_or("stale");
            Ok(Some(CredentialPayload {
                access_token: Some(token.to_string()),
                ..Default::default()
            }))
        }
    }

    fn host_of(uri: &str) -> String {
        Url::parse(uri).unwrap().host_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn rejects_domains_outside_the_allow_lists() {
        let server = MockServer::start().await;
        let manifest = AdapterManifest::none_strategy_fallback("mock");
        let ctx = AdapterContext::new(manifest, Arc::new(NoCredentialResolver), Duration::from_secs(5));

        let err = ctx
            .fetch(FetchRequest::get(format!("{}/anything", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DomainNotAllowed);
    }

    #[tokio::test]
    async fn injects_bearer_token_for_authenticated_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header("authorization", "Bearer tok1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let manifest = bearer_manifest(&host_of(&server.uri()));
        let resolver = Arc::new(FixedResolver(Some(CredentialPayload {
            access_token: Some("tok1".into()),
            ..Default::default()
        })));
        let ctx = AdapterContext::new(manifest, resolver, Duration::from_secs(5));

        let response = ctx
            .fetch(FetchRequest::get(format!("{}/resource", server.uri())))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn missing_credential_for_authenticated_host_is_rejected() {
        let server = MockServer::start().await;
        let manifest = bearer_manifest(&host_of(&server.uri()));
        let ctx = AdapterContext::new(manifest, Arc::new(NoCredentialResolver), Duration::from_secs(5));

        let err = ctx
            .fetch(FetchRequest::get(format!("{}/resource", server.uri())))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialNotFound);
    }

    #[tokio::test]
    async fn retries_once_on_401_with_a_forced_refresh_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let manifest = bearer_manifest(&host_of(&server.uri()));
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            tokens: vec!["stale", "fresh"],
        });
        let ctx = AdapterContext::new(manifest, resolver, Duration::from_secs(5));

        let response = ctx
            .fetch(FetchRequest::get(format!("{}/resource", server.uri())))
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn returns_the_original_401_when_the_retry_itself_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .mount(&server)
            .await;

        struct ErroringOnRefresh;
        #[async_trait]
        impl CredentialResolver for ErroringOnRefresh {
            async fn resolve(&self, force_refresh: bool) -> Result<Option<CredentialPayload>, AgpError> {
                if force_refresh {
                    return Err(AgpError::new(ErrorCode::AdapterOperation, "refresh exploded"));
                }
                Ok(Some(CredentialPayload {
                    access_token: Some("stale".into()),
                    ..Default::default()
                }))
            }
        }

        let manifest = bearer_manifest(&host_of(&server.uri()));
        let ctx = AdapterContext::new(manifest, Arc::new(ErroringOnRefresh), Duration::from_secs(5));

        let response = ctx
            .fetch(FetchRequest::get(format!("{}/resource", server.uri())))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
    }

    #[tokio::test]
    async fn none_strategy_never_resolves_a_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let manifest = AdapterManifest {
            platform: "mock".into(),
            auth: AuthConfig {
                strategy: AuthStrategy::None,
                scopes: vec![],
                header_name: None,
                cookie_name: None,
                oauth: None,
            },
            authenticated_domains: vec![],
            allowed_domains: vec![host_of(&server.uri())],
        };
        let ctx = AdapterContext::new(manifest, Arc::new(NoCredentialResolver), Duration::from_secs(5));

        let response = ctx
            .fetch(FetchRequest::get(format!("{}/public", server.uri())))
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn oauth_manifest_still_honours_none_credential_resolution() {
        // Sanity-check that an adapter can carry OAuth config while this
        // particular request targets its allowed-unauthenticated domain.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let manifest = AdapterManifest {
            platform: "mock".into(),
            auth: AuthConfig {
                strategy: AuthStrategy::Bearer,
                scopes: vec![],
                header_name: None,
                cookie_name: None,
                oauth: Some(OAuthConfig {
                    authorization_url: "https://example.com/authorize".into(),
                    token_url: "https://example.com/token".into(),
                    token_content_type: TokenContentType::Form,
                    oauth_service: "mock".into(),
                    extra_auth_params: Default::default(),
                }),
            },
            authenticated_domains: vec!["api.example.com".into()],
            allowed_domains: vec![host_of(&server.uri())],
        };
        let ctx = AdapterContext::new(manifest, Arc::new(NoCredentialResolver), Duration::from_secs(5));

        let response = ctx
            .fetch(FetchRequest::get(format!("{}/public", server.uri())))
            .await
            .unwrap();
        assert!(response.is_success());
    }
}
