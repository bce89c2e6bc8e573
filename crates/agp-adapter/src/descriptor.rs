// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generic interpreter for descriptor-driven adapters.
//!
//! A descriptor is a JSON document — manifest plus a small set of HTTP
//! call templates — that [`DescriptorRunner`] turns into a fully working
//! [`crate::Adapter`] without any adapter-specific Rust code. This is the
//! hot-swap mechanism: submitting, promoting, or generating an adapter is
//! nothing more than writing a new descriptor to the registry's runtime
//! directory.

use crate::context::{AdapterContext, FetchRequest};
use crate::Adapter;
use agp_core::manifest::AdapterManifest;
use agp_error::{AgpError, ErrorCode};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One HTTP call a descriptor-driven adapter can make.
///
/// `url_template` may reference top-level string fields of the verb's
/// input object as `{field_name}`; every placeholder must be resolved or
/// the call is rejected before any network I/O happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCallTemplate {
    /// HTTP method, e.g. `"GET"`, `"POST"`.
    pub method: String,
    /// URL template, may contain `{field}` placeholders.
    pub url_template: String,
    /// Static query parameters appended to every call.
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
}

/// A complete declarative adapter: manifest plus call templates for the
/// three AGP verbs. `discover` and `execute` are optional — an adapter
/// that only supports `query` simply omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Auth/domain manifest.
    pub manifest: AdapterManifest,
    /// Template used to answer `discover`.
    #[serde(default)]
    pub discover: Option<HttpCallTemplate>,
    /// Template used to answer `query`.
    pub query: HttpCallTemplate,
    /// Template used to answer `execute`.
    #[serde(default)]
    pub execute: Option<HttpCallTemplate>,
}

/// Interprets an [`AdapterDescriptor`] as a running [`Adapter`].
pub struct DescriptorRunner {
    descriptor: AdapterDescriptor,
}

impl DescriptorRunner {
    /// Wrap an already-parsed descriptor.
    #[must_use]
    pub fn new(descriptor: AdapterDescriptor) -> Self {
        Self { descriptor }
    }

    /// Parse a descriptor from its JSON source. This is the form adapter
    /// records store in `source_code` and the registry hot-loads from
    /// disk.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Validation`] if the JSON does not match the
    /// descriptor shape, or if the embedded manifest fails its own
    /// validation.
    pub fn from_json(raw: &str) -> Result<Self, AgpError> {
        let descriptor: AdapterDescriptor = serde_json::from_str(raw)
            .map_err(|e| AgpError::new(ErrorCode::Validation, "adapter descriptor is not valid JSON").with_source(e))?;
        descriptor.manifest.validate()?;
        Ok(Self::new(descriptor))
    }

    /// The descriptor this runner interprets.
    #[must_use]
    pub fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    async fn run_template(
        &self,
        ctx: &AdapterContext,
        template: &HttpCallTemplate,
        input: &Value,
    ) -> Result<Value, AgpError> {
        let mut url = substitute_placeholders(&template.url_template, input)?;
        if !template.query_params.is_empty() {
            let sep = if url.contains('?') { '&' } else { '?' };
            let qs = template
                .query_params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{url}{sep}{qs}");
        }

        let method = Method::from_bytes(template.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| AgpError::new(ErrorCode::Internal, "invalid descriptor HTTP method").with_source(e))?;
        let body = matches!(method, Method::POST | Method::PUT | Method::PATCH)
            .then(|| input.clone())
            .filter(|v| !v.is_null());

        let request = FetchRequest {
            method,
            url,
            headers: Default::default(),
            body,
        };

        let response = ctx.fetch(request).await?;
        if !response.is_success() {
            return Err(AgpError::new(
                ErrorCode::AdapterOperation,
                format!("upstream responded with status {}", response.status),
            )
            .with_context("platform", &self.descriptor.manifest.platform));
        }
        Ok(response.body)
    }
}

#[async_trait]
impl Adapter for DescriptorRunner {
    fn platform(&self) -> &str {
        &self.descriptor.manifest.platform
    }

    fn manifest(&self) -> &AdapterManifest {
        &self.descriptor.manifest
    }

    async fn discover(&self, ctx: &AdapterContext) -> Result<Value, AgpError> {
        let template = self.descriptor.discover.as_ref().ok_or_else(|| {
            AgpError::new(ErrorCode::AdapterOperation, "adapter does not implement discover")
                .with_context("platform", self.platform())
        })?;
        self.run_template(ctx, template, &Value::Null).await
    }

    async fn query(&self, ctx: &AdapterContext, input: Value) -> Result<Value, AgpError> {
        self.run_template(ctx, &self.descriptor.query, &input).await
    }

    async fn execute(&self, ctx: &AdapterContext, input: Value) -> Result<Value, AgpError> {
        let template = self.descriptor.execute.as_ref().ok_or_else(|| {
            AgpError::new(ErrorCode::AdapterOperation, "adapter does not implement execute")
                .with_context("platform", self.platform())
        })?;
        self.run_template(ctx, template, &input).await
    }
}

fn substitute_placeholders(template: &str, input: &Value) -> Result<String, AgpError> {
    let mut result = template.to_string();
    if let Value::Object(map) = input {
        for (key, value) in map {
            let placeholder = format!("{{{key}}}");
            if !result.contains(&placeholder) {
                continue;
            }
            let replacement = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            result = result.replace(&placeholder, &replacement);
        }
    }
    if result.contains('{') && result.contains('}') {
        return Err(AgpError::new(
            ErrorCode::Validation,
            format!("unresolved placeholder in descriptor URL template: {result}"),
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoCredentialResolver;
    use agp_core::manifest::{AuthConfig, AuthStrategy};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manifest_for(server: &MockServer) -> AdapterManifest {
        AdapterManifest {
            platform: "mock".into(),
            auth: AuthConfig {
                strategy: AuthStrategy::None,
                scopes: vec![],
                header_name: None,
                cookie_name: None,
                oauth: None,
            },
            authenticated_domains: vec![],
            allowed_domains: vec![reqwest::Url::parse(&server.uri())
                .unwrap()
                .host_str()
                .unwrap()
                .to_string()],
        }
    }

    #[test]
    fn substitutes_known_placeholders_and_rejects_unresolved_ones() {
        let input = serde_json::json!({"id": "cus_123"});
        let resolved = substitute_placeholders("https://api.example.com/customers/{id}", &input).unwrap();
        assert_eq!(resolved, "https://api.example.com/customers/cus_123");

        let err = substitute_placeholders("https://api.example.com/customers/{missing}", &input).unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn query_runs_the_configured_template_against_the_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "cus_1"})))
            .mount(&server)
            .await;

        let descriptor = AdapterDescriptor {
            manifest: manifest_for(&server),
            discover: None,
            query: HttpCallTemplate {
                method: "GET".into(),
                url_template: format!("{}/customers/{{id}}", server.uri()),
                query_params: BTreeMap::new(),
            },
            execute: None,
        };
        let runner = DescriptorRunner::new(descriptor);
        let ctx = AdapterContext::new(
            runner.manifest().clone(),
            Arc::new(NoCredentialResolver),
            Duration::from_secs(5),
        );

        let result = runner.query(&ctx, serde_json::json!({"id": "cus_1"})).await.unwrap();
        assert_eq!(result, serde_json::json!({"id": "cus_1"}));
    }

    #[tokio::test]
    async fn execute_without_a_template_is_rejected() {
        let server = MockServer::start().await;
        let descriptor = AdapterDescriptor {
            manifest: manifest_for(&server),
            discover: None,
            query: HttpCallTemplate {
                method: "GET".into(),
                url_template: format!("{}/noop", server.uri()),
                query_params: BTreeMap::new(),
            },
            execute: None,
        };
        let runner = DescriptorRunner::new(descriptor);
        let ctx = AdapterContext::new(
            runner.manifest().clone(),
            Arc::new(NoCredentialResolver),
            Duration::from_secs(5),
        );

        let err = runner.execute(&ctx, Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterOperation);
    }

    #[tokio::test]
    async fn non_success_upstream_status_is_surfaced_as_adapter_operation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/boom"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let descriptor = AdapterDescriptor {
            manifest: manifest_for(&server),
            discover: None,
            query: HttpCallTemplate {
                method: "GET".into(),
                url_template: format!("{}/boom", server.uri()),
                query_params: BTreeMap::new(),
            },
            execute: None,
        };
        let runner = DescriptorRunner::new(descriptor);
        let ctx = AdapterContext::new(
            runner.manifest().clone(),
            Arc::new(NoCredentialResolver),
            Duration::from_secs(5),
        );

        let err = runner.query(&ctx, Value::Null).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterOperation);
    }
}
