//! Unified error taxonomy with stable error codes for the AGP gateway.
//!
//! Every gateway error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context. Use the builder returned by
//! [`AgpError::new()`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed request bodies or shapes.
    Validation,
    /// Missing or invalid authentication.
    Auth,
    /// Authenticated but not permitted.
    Forbidden,
    /// Adapter context / credential errors.
    Adapter,
    /// Gateway resolution errors (business, adapter lookup).
    Gateway,
    /// Lifecycle/state-machine conflicts.
    Conflict,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Forbidden => "forbidden",
            Self::Adapter => "adapter",
            Self::Gateway => "gateway",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases — clients match on this
/// string, not on `Debug` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request body failed shape/type validation.
    Validation,
    /// No principal could be resolved from the request.
    AuthMissing,
    /// Principal credentials were resolved but are invalid/expired.
    AuthInvalid,
    /// Principal is authenticated but lacks the required scope.
    Forbidden,
    /// `Context.fetch` target hostname is in neither domain list.
    DomainNotAllowed,
    /// Vault has no credential for `(user, service)`.
    CredentialNotFound,
    /// A required field was missing from the resolved credential.
    CredentialMissingField,
    /// Adapter invocation did not complete within the configured timeout.
    AdapterExecutionTimeout,
    /// Adapter invocation returned an error.
    AdapterOperation,
    /// No business matches the supplied id.
    BusinessNotFound,
    /// No adapter is registered for the requested platform/scope.
    AdapterNotFound,
    /// Not a true error: a cached idempotent response is being replayed.
    IdempotencyReplay,
    /// Lifecycle transition conflicts with existing state (e.g. promote
    /// over an existing public adapter owned by someone else).
    Conflict,
    /// Anything else.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation => ErrorCategory::Validation,
            Self::AuthMissing | Self::AuthInvalid => ErrorCategory::Auth,
            Self::Forbidden => ErrorCategory::Forbidden,
            Self::DomainNotAllowed
            | Self::CredentialNotFound
            | Self::CredentialMissingField
            | Self::AdapterExecutionTimeout
            | Self::AdapterOperation => ErrorCategory::Adapter,
            Self::BusinessNotFound | Self::AdapterNotFound | Self::IdempotencyReplay => {
                ErrorCategory::Gateway
            }
            Self::Conflict => ErrorCategory::Conflict,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"DOMAIN_NOT_ALLOWED"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::AuthMissing => "AUTH_MISSING",
            Self::AuthInvalid => "AUTH_INVALID",
            Self::Forbidden => "FORBIDDEN",
            Self::DomainNotAllowed => "DOMAIN_NOT_ALLOWED",
            Self::CredentialNotFound => "CREDENTIAL_NOT_FOUND",
            Self::CredentialMissingField => "CREDENTIAL_MISSING_FIELD",
            Self::AdapterExecutionTimeout => "ADAPTER_TIMEOUT",
            Self::AdapterOperation => "ADAPTER_ERROR",
            Self::BusinessNotFound => "BUSINESS_NOT_FOUND",
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::IdempotencyReplay => "IDEMPOTENCY_REPLAY",
            Self::Conflict => "CONFLICT",
            Self::Internal => "INTERNAL",
        }
    }

    /// The HTTP status this code maps to at the gateway boundary, per the
    /// error-handling design's propagation table.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation | Self::BusinessNotFound | Self::AdapterNotFound => 400,
            Self::AuthMissing | Self::AuthInvalid => 401,
            Self::Forbidden => 403,
            Self::Conflict => 409,
            Self::AdapterOperation | Self::DomainNotAllowed => 502,
            Self::AdapterExecutionTimeout => 504,
            Self::CredentialNotFound | Self::CredentialMissingField => 400,
            Self::IdempotencyReplay => 200,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AgpError
// ---------------------------------------------------------------------------

/// Unified gateway error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use agp_error::{AgpError, ErrorCode};
///
/// let err = AgpError::new(ErrorCode::AdapterExecutionTimeout, "timed out after 30s")
///     .with_context("platform", "stripe")
///     .with_context("timeout_ms", 30_000);
/// ```
pub struct AgpError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl AgpError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Truncate `message` to at most `max_chars` characters, appending an
    /// ellipsis marker. Used when wrapping adapter failures, whose messages
    /// are attacker/provider-controlled and must not grow unbounded.
    #[must_use]
    pub fn truncated(code: ErrorCode, message: &str, max_chars: usize) -> Self {
        let truncated = if message.chars().count() > max_chars {
            let mut s: String = message.chars().take(max_chars).collect();
            s.push('…');
            s
        } else {
            message.to_string()
        };
        Self::new(code, truncated)
    }
}

impl fmt::Debug for AgpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("AgpError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for AgpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for AgpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`AgpError`] (without the opaque source),
/// matching the wire shape `{error, message, code, requestId, details?}`
/// used on the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgpErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context, surfaced as `details`.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any. Never sent to
    /// clients directly — used for server-side logging only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&AgpError> for AgpErrorDto {
    fn from(err: &AgpError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<AgpErrorDto> for AgpError {
    fn from(dto: AgpErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}
