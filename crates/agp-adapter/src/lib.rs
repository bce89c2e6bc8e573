// SPDX-License-Identifier: MIT OR Apache-2.0

//! The [`Adapter`] trait and its per-request execution [`AdapterContext`]:
//! domain gating, credential injection, single-flight credential
//! resolution, timeout enforcement, and 401 retry.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-request execution context handed to every [`Adapter`] call.
pub mod context;
/// Generic descriptor-driven adapter runner.
pub mod descriptor;

pub use context::{AdapterContext, CredentialResolver, FetchRequest, FetchResponse};
pub use descriptor::{AdapterDescriptor, DescriptorRunner, HttpCallTemplate};

use agp_core::manifest::AdapterManifest;
use agp_error::AgpError;
use async_trait::async_trait;
use serde_json::Value;

/// A platform integration capable of discovering capabilities, answering
/// read-only queries, and performing side-effecting actions.
///
/// Implementors are either bundled, hand-written integrations
/// ([`crate`]'s `agp-adapters` sibling crate) or [`DescriptorRunner`]s
/// built from a declarative descriptor (submitted, generated, or
/// promoted adapters).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Platform slug this adapter serves, e.g. `"stripe"`.
    fn platform(&self) -> &str;

    /// The manifest describing this adapter's auth strategy and domain
    /// allow-lists.
    fn manifest(&self) -> &AdapterManifest;

    /// Describe the capabilities/resources this adapter exposes.
    async fn discover(&self, ctx: &AdapterContext) -> Result<Value, AgpError>;

    /// Perform a read-only query.
    async fn query(&self, ctx: &AdapterContext, input: Value) -> Result<Value, AgpError>;

    /// Perform a side-effecting action, gated by the policy engine upstream.
    async fn execute(&self, ctx: &AdapterContext, input: Value) -> Result<Value, AgpError>;
}
