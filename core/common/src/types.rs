//! Common types used throughout the codec.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

/// 16-byte identifier selecting a cipher engine.
///
/// Identifiers are opaque and compared byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlgorithmId(Uuid);

impl AlgorithmId {
    /// Create an identifier from its 128-bit big-endian value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Create an identifier from its wire bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse an identifier from a slice, which must be exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|_| crate::Error::Format(format!("Invalid algorithm id length: {}", bytes.len())))
    }

    /// Get the wire bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 16-byte identifier selecting a key derivation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfId(Uuid);

impl KdfId {
    /// Create an identifier from its 128-bit big-endian value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Create an identifier from its wire bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse an identifier from a slice, which must be exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        Uuid::from_slice(bytes)
            .map(Self)
            .map_err(|_| crate::Error::Format(format!("Invalid KDF id length: {}", bytes.len())))
    }

    /// Get the wire bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for KdfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static EMPTY: ProtectedValue = ProtectedValue {
    protect: false,
    data: None,
};

/// A text or binary secret together with its protection flag.
///
/// Higher layers must check [`ProtectedValue::is_protected`] before
/// displaying, logging, copying or caching the payload. The payload is
/// zeroized when the value is dropped.
#[derive(Clone)]
pub struct ProtectedValue {
    protect: bool,
    data: Option<Vec<u8>>,
}

impl ProtectedValue {
    /// The shared, immutable empty value: no payload, not protected.
    pub fn empty() -> &'static ProtectedValue {
        &EMPTY
    }

    /// Create a value holding raw bytes.
    pub fn from_bytes(data: Vec<u8>, protect: bool) -> Self {
        Self {
            protect,
            data: Some(data),
        }
    }

    /// Create a value holding UTF-8 text.
    pub fn from_text(text: &str, protect: bool) -> Self {
        Self::from_bytes(text.as_bytes().to_vec(), protect)
    }

    /// Create a value with no payload at all.
    pub fn absent(protect: bool) -> Self {
        Self {
            protect,
            data: None,
        }
    }

    /// Whether the payload must be treated as a secret.
    pub fn is_protected(&self) -> bool {
        self.protect
    }

    /// Payload length in bytes; 0 when there is no payload.
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Whether the payload is absent or zero-length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a payload is present, even if it is zero-length.
    pub fn is_present(&self) -> bool {
        self.data.is_some()
    }

    /// Get the payload bytes; empty when absent.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Get the payload as text.
    ///
    /// # Errors
    /// - Returns error if the payload is not valid UTF-8
    pub fn as_text(&self) -> crate::Result<&str> {
        std::str::from_utf8(self.as_bytes())
            .map_err(|_| crate::Error::InvalidInput("Protected value is not valid UTF-8".to_string()))
    }

    /// Overwrite the payload in place and drop it.
    pub fn clear(&mut self) {
        if let Some(mut data) = self.data.take() {
            data.zeroize();
        }
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        self.protect == other.protect && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ProtectedValue {}

impl Drop for ProtectedValue {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.protect {
            write!(f, "ProtectedValue([REDACTED; {} bytes])", self.len())
        } else {
            f.debug_struct("ProtectedValue")
                .field("protect", &self.protect)
                .field("data", &String::from_utf8_lossy(self.as_bytes()))
                .finish()
        }
    }
}
