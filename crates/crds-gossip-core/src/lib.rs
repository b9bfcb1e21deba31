//! CRDS gossip core library
//!
//! Data model, wire encoding and cryptographic primitives shared by the
//! network layer and the gossip daemon.
//!
//! # Modules
//!
//! - [`types`]: Table values, labels and identity types
//! - [`wire`]: Fixed-layout binary encoding bounded by the packet size
//! - [`bloom`]: Bloom filters and partitioned pull filters
//! - [`crypto`]: Keypairs, signatures and hash derivations
//! - [`protocol`]: Gossip message envelope
//! - [`error`]: Error types and sanitize checks

pub mod bloom;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;
pub mod wire;

#[cfg(test)]
mod test_vectors;

pub use error::{Error, Result, Sanitize, SanitizeError};
pub use types::*;
