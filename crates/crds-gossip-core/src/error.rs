//! Error types for CRDS gossip

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed frame or value encoding
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),

    /// Out of range index, size, or wallclock
    #[error("sanitize error: {0}")]
    Sanitize(#[from] SanitizeError),

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encoded message does not fit in a single packet
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// Cheap structural checks run before any signature verification.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("value out of bounds")]
    ValueOutOfBounds,

    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("invalid value")]
    InvalidValue,
}

/// Types which can be structurally validated without touching state.
pub trait Sanitize {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError>;
}
