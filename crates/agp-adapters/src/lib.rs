// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bundled adapter descriptors: a local-development mock plus illustrative
//! real-platform templates, seeded into the registry's bundled directory
//! at startup.
//!
//! These are plain [`agp_adapter::descriptor::AdapterDescriptor`] JSON
//! documents, the same shape a business or the generation worker would
//! submit. Nothing here is special-cased by the registry — bundling just
//! means "always present, never expires from `Sandbox`".

#![deny(unsafe_code)]
#![warn(missing_docs)]

use agp_error::{AgpError, ErrorCode};
use std::path::Path;

/// One adapter this crate ships, ready to be written into a registry's
/// bundled directory.
#[derive(Debug, Clone)]
pub struct BundledAdapter {
    /// Platform slug, matching the descriptor's own `manifest.platform`.
    pub platform: &'static str,
    /// Semver version string embedded in the bundled filename.
    pub version: &'static str,
    /// Raw descriptor JSON, parseable by
    /// `agp_adapter::descriptor::DescriptorRunner::from_json`.
    pub descriptor_json: &'static str,
}

/// Local-development adapter with no auth and no real upstream
/// dependency — it targets `https://httpbin.org`, which freely echoes
/// back whatever is sent to it. Useful for exercising the gateway without
/// provisioning real credentials.
const MOCK_DESCRIPTOR: &str = r#"{
  "manifest": {
    "platform": "mock",
    "auth": { "strategy": "none" },
    "authenticated_domains": [],
    "allowed_domains": ["httpbin.org"]
  },
  "discover": {
    "method": "GET",
    "url_template": "https://httpbin.org/get",
    "query_params": {}
  },
  "query": {
    "method": "GET",
    "url_template": "https://httpbin.org/get",
    "query_params": { "source": "agp-mock" }
  },
  "execute": {
    "method": "POST",
    "url_template": "https://httpbin.org/post",
    "query_params": {}
  }
}"#;

/// Illustrative Stripe integration: bearer-token auth over the Stripe
/// API, scoped to a single customer lookup.
const STRIPE_DESCRIPTOR: &str = r#"{
  "manifest": {
    "platform": "stripe",
    "auth": {
      "strategy": "bearer",
      "scopes": ["read_write"],
      "oauth": {
        "authorization_url": "https://connect.stripe.com/oauth/authorize",
        "token_url": "https://connect.stripe.com/oauth/token",
        "token_content_type": "form",
        "oauth_service": "stripe",
        "extra_auth_params": {}
      }
    },
    "authenticated_domains": ["api.stripe.com"],
    "allowed_domains": []
  },
  "query": {
    "method": "GET",
    "url_template": "https://api.stripe.com/v1/customers/{customer_id}",
    "query_params": {}
  },
  "execute": {
    "method": "POST",
    "url_template": "https://api.stripe.com/v1/charges",
    "query_params": {}
  }
}"#;

/// Illustrative GitHub integration: bearer-token auth (personal access
/// token or OAuth app token) over the REST API, scoped to repository
/// issue lookup/creation.
const GITHUB_DESCRIPTOR: &str = r#"{
  "manifest": {
    "platform": "github",
    "auth": {
      "strategy": "bearer",
      "scopes": ["repo"],
      "oauth": {
        "authorization_url": "https://github.com/login/oauth/authorize",
        "token_url": "https://github.com/login/oauth/access_token",
        "token_content_type": "json",
        "oauth_service": "github",
        "extra_auth_params": {}
      }
    },
    "authenticated_domains": ["api.github.com"],
    "allowed_domains": []
  },
  "query": {
    "method": "GET",
    "url_template": "https://api.github.com/repos/{owner}/{repo}/issues/{issue_number}",
    "query_params": {}
  },
  "execute": {
    "method": "POST",
    "url_template": "https://api.github.com/repos/{owner}/{repo}/issues",
    "query_params": {}
  }
}"#;

/// Every adapter this crate ships, in the order they should be seeded.
#[must_use]
pub fn bundled_adapters() -> Vec<BundledAdapter> {
    vec![
        BundledAdapter {
            platform: "mock",
            version: "1.0.0",
            descriptor_json: MOCK_DESCRIPTOR,
        },
        BundledAdapter {
            platform: "stripe",
            version: "1.0.0",
            descriptor_json: STRIPE_DESCRIPTOR,
        },
        BundledAdapter {
            platform: "github",
            version: "1.0.0",
            descriptor_json: GITHUB_DESCRIPTOR,
        },
    ]
}

/// Write every bundled descriptor into `bundled_dir` as
/// `<platform>-<version>.json`, creating the directory if needed and
/// overwriting any existing file of the same name.
///
/// Call this once at startup, before the registry scans `bundled_dir`;
/// the registry's own insert-skip-overwrite semantics then decide what
/// actually gets loaded.
///
/// # Errors
///
/// Returns [`ErrorCode::Internal`] if the directory cannot be created or
/// a file cannot be written.
pub fn write_bundled_adapters(bundled_dir: &Path) -> Result<(), AgpError> {
    std::fs::create_dir_all(bundled_dir).map_err(|e| {
        AgpError::new(ErrorCode::Internal, "failed to create bundled adapter directory").with_source(e)
    })?;

    for adapter in bundled_adapters() {
        let path = bundled_dir.join(format!("{}-{}.json", adapter.platform, adapter.version));
        std::fs::write(&path, adapter.descriptor_json).map_err(|e| {
            AgpError::new(ErrorCode::Internal, format!("failed to write bundled adapter '{}'", adapter.platform))
                .with_source(e)
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_adapter::descriptor::DescriptorRunner;

    #[test]
    fn every_bundled_descriptor_parses_and_validates() {
        for adapter in bundled_adapters() {
            let runner = DescriptorRunner::from_json(adapter.descriptor_json)
                .unwrap_or_else(|e| panic!("{} descriptor failed to parse: {e}", adapter.platform));
            assert_eq!(runner.descriptor().manifest.platform, adapter.platform);
        }
    }

    #[test]
    fn bundled_platforms_are_unique() {
        let adapters = bundled_adapters();
        let mut platforms: Vec<&str> = adapters.iter().map(|a| a.platform).collect();
        platforms.sort_unstable();
        platforms.dedup();
        assert_eq!(platforms.len(), adapters.len());
    }

    #[test]
    fn write_bundled_adapters_creates_one_file_per_adapter() {
        let dir = tempfile::tempdir().unwrap();
        write_bundled_adapters(dir.path()).unwrap();

        let mut written: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        written.sort();

        assert_eq!(
            written,
            vec!["github-1.0.0.json", "mock-1.0.0.json", "stripe-1.0.0.json"]
        );
    }
}
