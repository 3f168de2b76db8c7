//! Common error types for TideVault.

use thiserror::Error;

/// Top-level error type for TideVault operations.
///
/// The source client distinguished failures by message text only; this
/// taxonomy carries the same distinguishing conditions as typed variants.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Password verification failed.
    #[error("Invalid password")]
    InvalidPassword,

    /// Operation exceeded its deadline.
    #[error("Request timed out")]
    Timeout,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A pairing attempt is already in flight.
    #[error("Pairing already in progress")]
    AlreadyPairing,

    /// A conflicting operation is already in flight.
    #[error("Busy: {0}")]
    Busy(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Opaque failure from the backing vault store, passed through unchanged.
    #[error("Store error: {0}")]
    Store(String),

    /// Opaque failure from the pairing backend, passed through unchanged.
    #[error("Pairing error: {0}")]
    Pairing(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
