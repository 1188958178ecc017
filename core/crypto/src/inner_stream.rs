//! Keystream for protected values inside the decrypted body.
//!
//! The structured-data layer masks every protected value with a keystream
//! drawn sequentially from one stream per container, so values must be
//! masked and unmasked in document order.

use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;
use sha2::{Digest, Sha512};
use std::fmt;
use zeroize::Zeroizing;

use crate::keys::sha256;
use vaultcodec_common::{Error, ProtectedValue, Result};

const SALSA20_NONCE: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// Inner stream algorithm identifiers stored in the container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerStreamKind {
    None,
    ArcFourVariant,
    Salsa20,
    ChaCha20,
}

impl InnerStreamKind {
    /// Map a stored identifier.
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(InnerStreamKind::None),
            1 => Ok(InnerStreamKind::ArcFourVariant),
            2 => Ok(InnerStreamKind::Salsa20),
            3 => Ok(InnerStreamKind::ChaCha20),
            other => Err(Error::Format(format!("Unknown inner stream id: {}", other))),
        }
    }

    /// Stored identifier.
    pub fn id(&self) -> u32 {
        match self {
            InnerStreamKind::None => 0,
            InnerStreamKind::ArcFourVariant => 1,
            InnerStreamKind::Salsa20 => 2,
            InnerStreamKind::ChaCha20 => 3,
        }
    }
}

/// Initialized keystream generator.
pub enum InnerStream {
    Salsa20(Salsa20),
    ChaCha20(ChaCha20),
}

impl InnerStream {
    /// Create the keystream for `kind` from the header's stream key.
    ///
    /// # Errors
    /// - `Crypto` for the unsupported `None` and `ArcFourVariant` kinds
    pub fn new(kind: InnerStreamKind, key: &[u8]) -> Result<Self> {
        match kind {
            InnerStreamKind::Salsa20 => {
                let key = Zeroizing::new(sha256(&[key]));
                let stream = Salsa20::new_from_slices(key.as_slice(), &SALSA20_NONCE)
                    .map_err(|e| Error::Crypto(format!("Salsa20 init failed: {}", e)))?;
                Ok(InnerStream::Salsa20(stream))
            }
            InnerStreamKind::ChaCha20 => {
                let digest = Zeroizing::new(Sha512::digest(key).to_vec());
                let stream = ChaCha20::new_from_slices(&digest[..32], &digest[32..44])
                    .map_err(|e| Error::Crypto(format!("ChaCha20 init failed: {}", e)))?;
                Ok(InnerStream::ChaCha20(stream))
            }
            other => Err(Error::Crypto(format!("Unsupported inner stream: {:?}", other))),
        }
    }

    /// XOR the next keystream bytes into `data`.
    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            InnerStream::Salsa20(stream) => stream.apply_keystream(data),
            InnerStream::ChaCha20(stream) => stream.apply_keystream(data),
        }
    }
}

impl fmt::Debug for InnerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InnerStream::Salsa20(_) => write!(f, "InnerStream::Salsa20"),
            InnerStream::ChaCha20(_) => write!(f, "InnerStream::ChaCha20"),
        }
    }
}

/// Masking helpers for [`ProtectedValue`].
pub trait ProtectedValueExt: Sized {
    /// Masked payload bytes for storage.
    fn mask_with(&self, stream: &mut InnerStream) -> Vec<u8>;

    /// Recover a protected value from stored masked bytes.
    fn unmask_with(masked: &[u8], stream: &mut InnerStream) -> Self;
}

impl ProtectedValueExt for ProtectedValue {
    fn mask_with(&self, stream: &mut InnerStream) -> Vec<u8> {
        let mut masked = self.as_bytes().to_vec();
        stream.apply(&mut masked);
        masked
    }

    fn unmask_with(masked: &[u8], stream: &mut InnerStream) -> Self {
        let mut plain = masked.to_vec();
        stream.apply(&mut plain);
        ProtectedValue::from_bytes(plain, true)
    }
}
