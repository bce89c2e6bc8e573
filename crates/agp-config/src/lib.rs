// SPDX-License-Identifier: MIT OR Apache-2.0
//! Environment-driven configuration loading, validation, and merging for
//! the AGP gateway.
//!
//! Every variable is read with the `AGP_` prefix. [`ServerConfig::from_env`]
//! loads defaults and applies overrides in one pass; [`ServerConfig::validate()`]
//! enforces the invariants the rest of the workspace assumes (positive
//! timeouts, a parseable execute-policy mode, distinct adapter directories).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use agp_error::{AgpError, ErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default per-adapter execution timeout
pub const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 30_000;

/// Default generation worker poll interval
pub const DEFAULT_GENERATION_POLL_SECS: u64 = 5;

/// Default number of generation jobs a single owner may enqueue per day.
pub const DEFAULT_GENERATION_DAILY_LIMIT: u32 = 10;

/// Execute-policy enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutePolicyMode {
    /// No confirmation required; every adapter call proceeds immediately.
    Permissive,
    /// `execute` calls require a `/agp/execute/prepare` confirmation token.
    Confirm,
    /// Like `Confirm`, but unconfirmed calls are hard-rejected rather than
    /// auto-allowed after a grace period.
    Strict,
}

impl ExecutePolicyMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "permissive" => Some(Self::Permissive),
            "confirm" => Some(Self::Confirm),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

impl Default for ExecutePolicyMode {
    fn default() -> Self {
        Self::Confirm
    }
}

/// Top-level runtime configuration for the AGP gateway.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    pub bind_address: String,
    /// Externally reachable base URL, used to build OAuth callback
    /// (`redirect_uri`) links for the `/connect/:service` flow.
    pub public_base_url: String,
    /// `sqlx` database URL, e.g. `"sqlite://agp.db"`.
    pub database_url: String,
    /// Read-only directory of bundled adapter descriptors.
    pub bundled_dir: PathBuf,
    /// Writable directory for sandbox/promoted/generated adapter descriptors.
    pub runtime_dir: PathBuf,
    /// Identifier of the configured KMS key (managed backend) or the mock
    /// secret (mock backend — see `AGP_KMS_MOCK_SECRET`).
    pub kms_key_id: String,
    /// When set, the mock KMS backend is used instead of a managed one.
    pub kms_mock_secret: Option<String>,
    /// Per-adapter execution timeout in milliseconds.
    pub adapter_timeout_ms: u64,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Principal ids treated as admins regardless of stored role.
    pub admin_emails: Vec<String>,
    /// Execute-policy enforcement mode.
    pub execute_policy_mode: ExecutePolicyMode,
    /// Maximum generation jobs a single owner may enqueue per rolling day.
    pub generation_daily_limit: u32,
    /// Generation worker poll interval in seconds.
    pub generation_poll_secs: u64,
    /// Default LLM provider passed to the generator when a job omits one.
    pub generator_provider: Option<String>,
    /// Default LLM model passed to the generator when a job omits one.
    pub generator_model: Option<String>,
    /// `tracing` log level / `EnvFilter` directive.
    pub log_level: String,
    /// Emit JSON-formatted logs instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            database_url: "sqlite://agp.db".to_string(),
            bundled_dir: PathBuf::from("./adapters/bundled"),
            runtime_dir: PathBuf::from("./adapters/runtime"),
            kms_key_id: "mock".to_string(),
            kms_mock_secret: Some("dev-only-insecure-secret".to_string()),
            adapter_timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
            cors_origins: Vec::new(),
            admin_emails: Vec::new(),
            execute_policy_mode: ExecutePolicyMode::default(),
            generation_daily_limit: DEFAULT_GENERATION_DAILY_LIMIT,
            generation_poll_secs: DEFAULT_GENERATION_POLL_SECS,
            generator_provider: None,
            generator_model: None,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl ServerConfig {
    /// Build a [`ServerConfig`] starting from [`Self::default()`] and
    /// overlaying every recognised `AGP_*` environment variable.
    pub fn from_env() -> Result<Self, AgpError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGP_*` overrides in place. Recognised variables:
    /// `AGP_BIND_ADDRESS`, `AGP_PUBLIC_BASE_URL`, `AGP_DATABASE_URL`, `AGP_BUNDLED_DIR`,
    /// `AGP_RUNTIME_DIR`, `AGP_KMS_KEY_ID`, `AGP_KMS_MOCK_SECRET`,
    /// `AGP_ADAPTER_TIMEOUT_MS`, `AGP_CORS_ORIGINS` (comma-separated),
    /// `AGP_ADMIN_EMAILS` (comma-separated), `AGP_EXECUTE_POLICY_MODE`,
    /// `AGP_GENERATION_DAILY_LIMIT`, `AGP_GENERATION_POLL_SECS`,
    /// `AGP_GENERATOR_PROVIDER`, `AGP_GENERATOR_MODEL`, `AGP_LOG_LEVEL`,
    /// `AGP_JSON_LOGS`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AGP_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Ok(v) = std::env::var("AGP_PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Ok(v) = std::env::var("AGP_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("AGP_BUNDLED_DIR") {
            self.bundled_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AGP_RUNTIME_DIR") {
            self.runtime_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AGP_KMS_KEY_ID") {
            self.kms_key_id = v;
        }
        if let Ok(v) = std::env::var("AGP_KMS_MOCK_SECRET") {
            self.kms_mock_secret = Some(v);
        }
        if let Ok(v) = std::env::var("AGP_ADAPTER_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.adapter_timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("AGP_CORS_ORIGINS") {
            self.cors_origins = split_csv(&v);
        }
        if let Ok(v) = std::env::var("AGP_ADMIN_EMAILS") {
            self.admin_emails = split_csv(&v);
        }
        if let Ok(v) = std::env::var("AGP_EXECUTE_POLICY_MODE") {
            if let Some(mode) = ExecutePolicyMode::parse(&v) {
                self.execute_policy_mode = mode;
            }
        }
        if let Ok(v) = std::env::var("AGP_GENERATION_DAILY_LIMIT") {
            if let Ok(n) = v.parse() {
                self.generation_daily_limit = n;
            }
        }
        if let Ok(v) = std::env::var("AGP_GENERATION_POLL_SECS") {
            if let Ok(n) = v.parse() {
                self.generation_poll_secs = n;
            }
        }
        if let Ok(v) = std::env::var("AGP_GENERATOR_PROVIDER") {
            self.generator_provider = Some(v);
        }
        if let Ok(v) = std::env::var("AGP_GENERATOR_MODEL") {
            self.generator_model = Some(v);
        }
        if let Ok(v) = std::env::var("AGP_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("AGP_JSON_LOGS") {
            self.json_logs = matches!(v.trim(), "1" | "true" | "TRUE" | "yes");
        }
    }

    /// Validate cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Validation`] describing every problem found,
    /// joined into one message.
    pub fn validate(&self) -> Result<(), AgpError> {
        let mut problems = Vec::new();

        if self.adapter_timeout_ms == 0 {
            problems.push("adapter_timeout_ms must be positive".to_string());
        }
        if self.generation_poll_secs == 0 {
            problems.push("generation_poll_secs must be positive".to_string());
        }
        if self.bundled_dir == self.runtime_dir {
            problems.push(
                "bundled_dir and runtime_dir must be distinct (bundled isolation invariant)"
                    .to_string(),
            );
        }
        if self.kms_mock_secret.is_none() && self.kms_key_id == "mock" {
            problems.push(
                "kms_key_id is \"mock\" but no AGP_KMS_MOCK_SECRET is configured".to_string(),
            );
        }
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            problems.push(format!("bind_address '{}' is not a valid socket address", self.bind_address));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AgpError::new(ErrorCode::Validation, problems.join("; ")))
        }
    }

    /// Returns `true` if `email` (case-insensitively) is in
    /// [`Self::admin_emails`].
    #[must_use]
    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|a| a.eq_ignore_ascii_case(email))
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_adapter_timeout() {
        let mut config = ServerConfig::default();
        config.adapter_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(err.message.contains("adapter_timeout_ms"));
    }

    #[test]
    fn rejects_identical_bundled_and_runtime_dirs() {
        let mut config = ServerConfig::default();
        config.runtime_dir = config.bundled_dir.clone();
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("bundled_dir"));
    }

    #[test]
    fn execute_policy_mode_parses_case_insensitively() {
        assert_eq!(ExecutePolicyMode::parse("STRICT"), Some(ExecutePolicyMode::Strict));
        assert_eq!(ExecutePolicyMode::parse(" confirm "), Some(ExecutePolicyMode::Confirm));
        assert_eq!(ExecutePolicyMode::parse("bogus"), None);
    }

    #[test]
    fn is_admin_is_case_insensitive() {
        let mut config = ServerConfig::default();
        config.admin_emails = vec!["Admin@Example.com".to_string()];
        assert!(config.is_admin("admin@example.com"));
        assert!(!config.is_admin("nobody@example.com"));
    }

    #[test]
    fn split_csv_trims_and_drops_empties() {
        assert_eq!(
            split_csv(" a, b ,,c"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
