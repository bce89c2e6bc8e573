// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-execute confirmation / strict policy gate.
//!
//! This crate deliberately carries no database dependency: confirmation
//! tokens are a process-local, short-TTL gate in front of `execute`, not a
//! durable record. A server restart simply invalidates any tokens issued
//! but not yet redeemed, which is the correct behavior — the caller
//! re-prepares and gets a fresh one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use agp_core::Business;
use agp_error::{AgpError, ErrorCode};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use uuid::Uuid;

/// How strictly `execute` calls are gated behind a confirmation token.
///
/// Mirrors `agp_config::ExecutePolicyMode`; kept as a separate type here so
/// this crate has no dependency on `agp-config` — callers translate at the
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    /// No confirmation required; every `execute` call proceeds.
    Permissive,
    /// Unconfirmed calls get a token back instead of running; a second
    /// call presenting that token proceeds.
    Confirm,
    /// Unconfirmed calls are rejected outright; a valid token is the only
    /// way through.
    Strict,
}

/// What the gate decided for one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum PolicyDecision {
    /// The call may proceed.
    Allow,
    /// The call did not carry a valid token; retry with this one.
    RequireConfirmation {
        /// Opaque token to present on retry.
        token: String,
    },
}

/// TTL for an issued confirmation token, in minutes.
pub const CONFIRMATION_TOKEN_TTL_MINUTES: i64 = 5;

struct PendingConfirmation {
    call_fingerprint: u64,
    expires_at: DateTime<Utc>,
}

fn fingerprint(business: &Business, platform: &str, input: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    business.id.hash(&mut hasher);
    platform.hash(&mut hasher);
    input.to_string().hash(&mut hasher);
    hasher.finish()
}

/// In-memory confirmation-token gate for `execute` calls.
pub struct PolicyEngine {
    pending: RwLock<HashMap<String, PendingConfirmation>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Construct an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self { pending: RwLock::new(HashMap::new()) }
    }

    /// Issue a confirmation token bound to `(business, platform, input)`,
    /// valid for [`CONFIRMATION_TOKEN_TTL_MINUTES`]. Returns `None` under
    /// [`PolicyMode::Permissive`], where no confirmation is ever required.
    #[must_use]
    pub fn prepare(&self, mode: PolicyMode, business: &Business, platform: &str, input: &serde_json::Value) -> Option<String> {
        if mode == PolicyMode::Permissive {
            return None;
        }
        Some(self.issue_token(business, platform, input))
    }

    fn issue_token(&self, business: &Business, platform: &str, input: &serde_json::Value) -> String {
        self.gc();
        let token = Uuid::new_v4().to_string();
        let entry = PendingConfirmation {
            call_fingerprint: fingerprint(business, platform, input),
            expires_at: Utc::now() + Duration::minutes(CONFIRMATION_TOKEN_TTL_MINUTES),
        };
        self.pending.write().expect("policy lock poisoned").insert(token.clone(), entry);
        token
    }

    /// Decide whether an `execute` call may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::Forbidden`] under [`PolicyMode::Strict`] when
    /// no valid token for this exact call was presented.
    pub fn evaluate(
        &self,
        mode: PolicyMode,
        business: &Business,
        platform: &str,
        input: &serde_json::Value,
        provided_token: Option<&str>,
    ) -> Result<PolicyDecision, AgpError> {
        if mode == PolicyMode::Permissive {
            return Ok(PolicyDecision::Allow);
        }

        if let Some(token) = provided_token {
            if self.redeem(token, business, platform, input) {
                return Ok(PolicyDecision::Allow);
            }
        }

        if mode == PolicyMode::Strict {
            return Err(AgpError::new(
                ErrorCode::Forbidden,
                "execute requires a valid confirmation token under strict policy",
            ));
        }

        Ok(PolicyDecision::RequireConfirmation { token: self.issue_token(business, platform, input) })
    }

    /// Redeem `token` if it exists, has not expired, and matches the exact
    /// `(business, platform, input)` it was issued for. One-time use:
    /// consumed on success or on expiry.
    fn redeem(&self, token: &str, business: &Business, platform: &str, input: &serde_json::Value) -> bool {
        let mut pending = self.pending.write().expect("policy lock poisoned");
        let Some(entry) = pending.remove(token) else { return false };
        if entry.expires_at <= Utc::now() {
            return false;
        }
        entry.call_fingerprint == fingerprint(business, platform, input)
    }

    /// Drop expired pending confirmations. Called opportunistically; safe
    /// to call any time.
    fn gc(&self) {
        let now = Utc::now();
        self.pending.write().expect("policy lock poisoned").retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agp_core::BusinessStatus;
    use serde_json::json;

    fn test_business(id: &str) -> Business {
        Business {
            id: id.to_string(),
            owner_id: "owner-1".to_string(),
            name: "Test Business".to_string(),
            platform: "stripe".to_string(),
            location: None,
            description: None,
            category: None,
            preferences: None,
            status: BusinessStatus::Active,
        }
    }

    #[test]
    fn permissive_always_allows() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        let decision = engine.evaluate(PolicyMode::Permissive, &biz, "stripe", &json!({}), None).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn confirm_without_token_issues_one_and_allows_retry() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        let first = engine.evaluate(PolicyMode::Confirm, &biz, "stripe", &json!({"amount": 5}), None).unwrap();
        let PolicyDecision::RequireConfirmation { token } = first else { panic!("expected confirmation") };

        let second = engine
            .evaluate(PolicyMode::Confirm, &biz, "stripe", &json!({"amount": 5}), Some(&token))
            .unwrap();
        assert_eq!(second, PolicyDecision::Allow);
    }

    #[test]
    fn token_is_single_use() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        let token = engine.prepare(PolicyMode::Confirm, &biz, "stripe", &json!({})).unwrap();
        assert!(engine.redeem(&token, &biz, "stripe", &json!({})));
        assert!(!engine.redeem(&token, &biz, "stripe", &json!({})));
    }

    #[test]
    fn token_bound_to_its_exact_call() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        let token = engine.prepare(PolicyMode::Confirm, &biz, "stripe", &json!({"amount": 5})).unwrap();
        assert!(!engine.redeem(&token, &biz, "stripe", &json!({"amount": 6})));
    }

    #[test]
    fn strict_rejects_without_a_token() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        let err = engine.evaluate(PolicyMode::Strict, &biz, "stripe", &json!({}), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[test]
    fn strict_allows_with_a_valid_token() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        let token = engine.prepare(PolicyMode::Strict, &biz, "stripe", &json!({})).unwrap();
        let decision = engine.evaluate(PolicyMode::Strict, &biz, "stripe", &json!({}), Some(&token)).unwrap();
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn permissive_never_issues_a_token() {
        let engine = PolicyEngine::new();
        let biz = test_business("biz");
        assert!(engine.prepare(PolicyMode::Permissive, &biz, "stripe", &json!({})).is_none());
    }
}
