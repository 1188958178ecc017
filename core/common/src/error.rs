//! Common error types for the vault codec.

use std::io;

use thiserror::Error;

use crate::types::{AlgorithmId, KdfId};

/// Top-level error type for codec operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Cipher identifier is not registered.
    #[error("Unsupported cipher algorithm: {0}")]
    UnsupportedAlgorithm(AlgorithmId),

    /// Key derivation function identifier is not registered.
    #[error("Unknown key derivation function: {0}")]
    UnknownKdf(KdfId),

    /// A block frame failed hash or MAC verification.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Key derivation rejected its parameters or the primitive failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// The supplied key material does not open the container.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Container layout is malformed.
    #[error("Format error: {0}")]
    Format(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl Error {
    /// Wrap this error for transport through a `std::io` stream.
    ///
    /// The original error is recovered by `From<io::Error>`.
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Whether this error means the data itself was damaged or tampered with.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::IntegrityViolation(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(err) = inner.downcast::<Error>() {
                    return *err;
                }
            }
            return Error::Format("stream error lost its cause".to_string());
        }
        Error::Io(e)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
