// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent transaction and business record stores.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Owner-scoped business profile CRUD and public discovery listing.
pub mod business;
/// Per-call transaction record CRUD and owner-scoped status lookup.
pub mod transaction;

pub use business::BusinessStore;
pub use transaction::TransactionStore;
