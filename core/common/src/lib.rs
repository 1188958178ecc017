//! Common utilities and types shared across the vault codec crates.
//!
//! This module provides the error taxonomy, the algorithm identifiers used
//! to select ciphers and key derivation functions, and the protected value
//! holder for in-memory secrets.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{AlgorithmId, KdfId, ProtectedValue};
