//! Adapter manifest: declarative auth strategy, domain allow-lists, and
//! OAuth endpoint configuration.

use agp_error::{AgpError, ErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How an adapter authenticates outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    /// No credential required.
    None,
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// A configurable header carries an API key.
    ApiKeyHeader,
    /// HTTP Basic auth.
    Basic,
    /// A named cookie carries the credential.
    Cookie,
    /// A configurable header/value pair, fully adapter-defined.
    Custom,
    /// Adapter manages its own client-credentials exchange via `getCredential`.
    ClientCredentials,
}

impl AuthStrategy {
    /// Strategies for which `Context.fetch` retries once on a 401 by
    /// forcing a credential refresh.
    #[must_use]
    pub fn retries_on_401(&self) -> bool {
        !matches!(self, AuthStrategy::None | AuthStrategy::ClientCredentials)
    }
}

/// Auth configuration block of an [`AdapterManifest`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AuthConfig {
    /// Authentication strategy.
    pub strategy: AuthStrategy,
    /// OAuth scopes requested, if applicable.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Header name for `ApiKeyHeader`/`Custom` strategies. Defaults to
    /// `X-Api-Key` for `ApiKeyHeader` when unset.
    #[serde(default)]
    pub header_name: Option<String>,
    /// Cookie name for the `Cookie` strategy.
    #[serde(default)]
    pub cookie_name: Option<String>,
    /// OAuth endpoint configuration, required when `strategy` implies OAuth.
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

/// Body encoding used when POSTing to an OAuth token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenContentType {
    /// `application/x-www-form-urlencoded`.
    Form,
    /// `application/json`.
    Json,
}

/// OAuth 2.0 endpoint configuration for an adapter.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OAuthConfig {
    /// Authorization endpoint. Must be `https`.
    pub authorization_url: String,
    /// Token endpoint. Must be `https`.
    pub token_url: String,
    /// Body encoding for token requests.
    pub token_content_type: TokenContentType,
    /// Service identifier used to look up [`crate::AppCredential`]s.
    pub oauth_service: String,
    /// Extra static parameters appended to the authorize URL.
    #[serde(default)]
    pub extra_auth_params: std::collections::BTreeMap<String, String>,
}

/// Declarative adapter metadata, parsed from an adapter's descriptor or
/// bundled module export.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdapterManifest {
    /// Lowercase dns-like platform slug, e.g. `"stripe"`.
    pub platform: String,
    /// Auth configuration.
    pub auth: AuthConfig,
    /// Hostnames requiring injected credentials.
    #[serde(default)]
    pub authenticated_domains: Vec<String>,
    /// Hostnames reachable without credentials.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn normalize_domain(d: &str) -> String {
    let trimmed = d.trim().to_ascii_lowercase();
    trimmed.strip_suffix('.').unwrap_or(&trimmed).to_string()
}

fn normalize_list(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AdapterManifest {
    /// Validate the manifest against the legality rules:
    /// - if `auth.strategy != None`, `authenticated_domains` must be non-empty;
    /// - the two domain lists must be disjoint after lowercase/trailing-dot
    ///   normalization;
    /// - any configured OAuth URLs must be `https`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Validation`] describing the first rule violated.
    pub fn validate(&self) -> Result<(), AgpError> {
        if self.auth.strategy != AuthStrategy::None && self.authenticated_domains.is_empty() {
            return Err(AgpError::new(
                ErrorCode::Validation,
                "authenticatedDomains must be non-empty when auth.strategy != none",
            )
            .with_context("platform", &self.platform));
        }

        let normalized_auth: std::collections::HashSet<String> = self
            .authenticated_domains
            .iter()
            .map(|d| normalize_domain(d))
            .collect();
        let normalized_allowed: std::collections::HashSet<String> = self
            .allowed_domains
            .iter()
            .map(|d| normalize_domain(d))
            .collect();
        if let Some(overlap) = normalized_auth.intersection(&normalized_allowed).next() {
            return Err(AgpError::new(
                ErrorCode::Validation,
                format!("domain '{overlap}' appears in both authenticated and allowed lists"),
            )
            .with_context("platform", &self.platform));
        }

        if let Some(oauth) = &self.auth.oauth {
            for (label, url) in [
                ("authorizationUrl", &oauth.authorization_url),
                ("tokenUrl", &oauth.token_url),
            ] {
                if !url.starts_with("https://") {
                    return Err(AgpError::new(
                        ErrorCode::Validation,
                        format!("oauth.{label} must be https"),
                    )
                    .with_context("platform", &self.platform));
                }
            }
        }

        Ok(())
    }

    /// Classification of a hostname against this manifest's domain lists.
    #[must_use]
    pub fn classify_domain(&self, host: &str) -> DomainClass {
        let host = normalize_domain(host);
        if self
            .authenticated_domains
            .iter()
            .any(|d| normalize_domain(d) == host)
        {
            DomainClass::Authenticated
        } else if self
            .allowed_domains
            .iter()
            .any(|d| normalize_domain(d) == host)
        {
            DomainClass::AllowedUnauthenticated
        } else {
            DomainClass::Rejected
        }
    }

    /// A permissive fallback manifest used when the gateway cannot resolve
    /// a real manifest for a platform (strategy `none`, empty domain lists).
    #[must_use]
    pub fn none_strategy_fallback(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            auth: AuthConfig {
                strategy: AuthStrategy::None,
                scopes: Vec::new(),
                header_name: None,
                cookie_name: None,
                oauth: None,
            },
            authenticated_domains: Vec::new(),
            allowed_domains: Vec::new(),
        }
    }
}

/// Result of classifying a hostname against a manifest's domain lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainClass {
    /// Hostname requires injected credentials.
    Authenticated,
    /// Hostname is reachable without credentials.
    AllowedUnauthenticated,
    /// Hostname is in neither list; the request must be rejected.
    Rejected,
}

/// Consuming-self builder for [`AdapterManifest`], mirroring the workspace's
/// builder convention for contract types.
#[derive(Debug, Default)]
pub struct AdapterManifestBuilder {
    platform: String,
    strategy: AuthStrategy,
    scopes: Vec<String>,
    header_name: Option<String>,
    cookie_name: Option<String>,
    oauth: Option<OAuthConfig>,
    authenticated_domains: Vec<String>,
    allowed_domains: Vec<String>,
}

impl Default for AuthStrategy {
    fn default() -> Self {
        AuthStrategy::None
    }
}

impl AdapterManifestBuilder {
    /// Start a builder for the given platform slug.
    #[must_use]
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Default::default()
        }
    }

    /// Set the auth strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: AuthStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set OAuth scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the header name used by `ApiKeyHeader`/`Custom` strategies.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }

    /// Set the cookie name used by the `Cookie` strategy.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = Some(name.into());
        self
    }

    /// Attach OAuth endpoint configuration.
    #[must_use]
    pub fn oauth(mut self, oauth: OAuthConfig) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Set authenticated domains (trimmed, empties dropped).
    #[must_use]
    pub fn authenticated_domains(mut self, domains: Vec<String>) -> Self {
        self.authenticated_domains = normalize_list(&domains);
        self
    }

    /// Set allowed-unauthenticated domains (trimmed, empties dropped).
    #[must_use]
    pub fn allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = normalize_list(&domains);
        self
    }

    /// Build and validate the manifest
    ///
    /// # Errors
    ///
    /// Propagates [`AdapterManifest::validate()`]'s error.
    pub fn build(self) -> Result<AdapterManifest, AgpError> {
        let manifest = AdapterManifest {
            platform: self.platform,
            auth: AuthConfig {
                strategy: self.strategy,
                scopes: self.scopes,
                header_name: self.header_name,
                cookie_name: self.cookie_name,
                oauth: self.oauth,
            },
            authenticated_domains: self.authenticated_domains,
            allowed_domains: self.allowed_domains,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_authenticated_domains_unless_strategy_none() {
        let err = AdapterManifestBuilder::new("stripe")
            .strategy(AuthStrategy::Bearer)
            .build
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn none_strategy_permits_empty_domains() {
        let manifest = AdapterManifestBuilder::new("mock")
            .strategy(AuthStrategy::None)
            .build
            .unwrap();
        assert!(manifest.authenticated_domains.is_empty());
    }

    #[test]
    fn rejects_overlapping_domains_case_and_dot_insensitive() {
        let err = AdapterManifestBuilder::new("stripe")
            .strategy(AuthStrategy::Bearer)
            .authenticated_domains(vec!["API.stripe.com.".into()])
            .allowed_domains(vec!["api.stripe.com".into()])
            .build
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn rejects_non_https_oauth_urls() {
        let err = AdapterManifestBuilder::new("stripe")
            .strategy(AuthStrategy::Bearer)
            .authenticated_domains(vec!["api.stripe.com".into()])
            .oauth(OAuthConfig {
                authorization_url: "http://stripe.com/oauth/authorize".into(),
                token_url: "https://stripe.com/oauth/token".into(),
                token_content_type: TokenContentType::Form,
                oauth_service: "stripe".into(),
                extra_auth_params: Default::default(),
            })
            .build
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[test]
    fn classify_domain_matches_normalized_lists() {
        let manifest = AdapterManifestBuilder::new("stripe")
            .strategy(AuthStrategy::Bearer)
            .authenticated_domains(vec!["api.stripe.com".into()])
            .allowed_domains(vec!["stripe.com".into()])
            .build
            .unwrap();
        assert_eq!(
            manifest.classify_domain("API.Stripe.com."),
            DomainClass::Authenticated
        );
        assert_eq!(
            manifest.classify_domain("stripe.com"),
            DomainClass::AllowedUnauthenticated
        );
        assert_eq!(
            manifest.classify_domain("evil.example.com"),
            DomainClass::Rejected
        );
    }

    #[test]
    fn empty_domain_entries_are_dropped() {
        let manifest = AdapterManifestBuilder::new("stripe")
            .strategy(AuthStrategy::Bearer)
            .authenticated_domains(vec!["  ".into(), "api.stripe.com".into()])
            .build
            .unwrap();
        assert_eq!(manifest.authenticated_domains, vec!["api.stripe.com"]);
    }
}
