//! KMS shim and AES-256-GCM envelope encryption.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// KMS data-key wrap/unwrap.
pub mod kms;
/// Envelope seal/open and the zeroizing decrypt helper.
pub mod envelope;

pub use envelope::{open, seal, with_decrypted_credential, SealedBlob};
pub use kms::{KmsBackend, ManagedKms, MockKms};
