// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hash-chained append-only audit log with metadata redaction.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// `AuditChain`: append and verify.
pub mod chain;
/// Recursive secret-key redaction over JSON metadata.
pub mod redact;

pub use chain::AuditChain;
pub use redact::{redact_metadata, sanitize_failure_text};
