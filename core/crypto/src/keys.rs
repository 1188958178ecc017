//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::key_file;
use vaultcodec_common::{Error, Result};

/// Length of cipher keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the master seed stored in the container header.
pub const MASTER_SEED_LENGTH: usize = 32;

/// Length of the HMAC base key.
pub const HMAC_KEY_LENGTH: usize = 64;

/// Combined user secret before key derivation.
///
/// Built from a password and/or a key file; each component is hashed and
/// the concatenated component hashes are hashed again.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CompositeKey {
    key: [u8; KEY_LENGTH],
}

impl CompositeKey {
    /// Start building a composite key.
    pub fn builder() -> CompositeKeyBuilder {
        CompositeKeyBuilder::default()
    }

    /// Composite key from a password alone.
    pub fn from_password(password: &[u8]) -> Result<Self> {
        Self::builder().password(password).build()
    }

    /// Create a composite key from already combined bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompositeKey([REDACTED])")
    }
}

/// Builder collecting composite key components.
#[derive(Default)]
pub struct CompositeKeyBuilder {
    password: Option<Zeroizing<[u8; KEY_LENGTH]>>,
    key_file: Option<Zeroizing<[u8; KEY_LENGTH]>>,
}

impl CompositeKeyBuilder {
    /// Add a password component.
    pub fn password(mut self, password: &[u8]) -> Self {
        self.password = Some(Zeroizing::new(sha256(&[password])));
        self
    }

    /// Add a key file component from the file's raw content.
    ///
    /// An XML key file (version 1.0 or 2.0) yields its stored key. Otherwise
    /// a 32-byte file is used as is, a 64-character hex file is decoded, and
    /// anything else is hashed.
    pub fn key_file(mut self, content: &[u8]) -> Self {
        self.key_file = Some(Zeroizing::new(key_file_hash(content)));
        self
    }

    /// Combine the components.
    ///
    /// # Errors
    /// - Returns error if no component was supplied
    pub fn build(self) -> Result<CompositeKey> {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(2);
        if let Some(password) = self.password.as_ref() {
            parts.push(password.as_slice());
        }
        if let Some(key_file) = self.key_file.as_ref() {
            parts.push(key_file.as_slice());
        }
        if parts.is_empty() {
            return Err(Error::InvalidInput(
                "Composite key needs a password or a key file".to_string(),
            ));
        }
        Ok(CompositeKey::from_bytes(sha256(&parts)))
    }
}

fn key_file_hash(content: &[u8]) -> [u8; KEY_LENGTH] {
    if let Some(key) = key_file::parse_xml(content) {
        return *key;
    }
    if content.len() == KEY_LENGTH {
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(content);
        return key;
    }
    if content.len() == KEY_LENGTH * 2 {
        let mut key = [0u8; KEY_LENGTH];
        if hex::decode_to_slice(content, &mut key).is_ok() {
            return key;
        }
    }
    sha256(&[content])
}

/// High-entropy key produced by a key derivation function.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    /// Create a derived key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Normalize arbitrary KDF output to a 32-byte key.
    ///
    /// Output that is already 32 bytes is kept, anything else is hashed.
    pub fn from_output(output: &[u8]) -> Self {
        if output.len() == KEY_LENGTH {
            let mut key = [0u8; KEY_LENGTH];
            key.copy_from_slice(output);
            Self { key }
        } else {
            Self {
                key: sha256(&[output]),
            }
        }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Keys used directly by the container: the cipher key and the HMAC base key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FinalKeys {
    cipher_key: [u8; KEY_LENGTH],
    hmac_key: [u8; HMAC_KEY_LENGTH],
}

impl FinalKeys {
    /// Combine the header's master seed with the derived key.
    ///
    /// # Postconditions
    /// - cipher key = SHA-256(master_seed || derived)
    /// - HMAC base key = SHA-512(master_seed || derived || 0x01)
    pub fn derive(master_seed: &[u8], derived: &DerivedKey) -> Result<Self> {
        if master_seed.len() != MASTER_SEED_LENGTH {
            return Err(Error::Format(format!(
                "Invalid master seed length: expected {}, got {}",
                MASTER_SEED_LENGTH,
                master_seed.len()
            )));
        }

        let cipher_key = sha256(&[master_seed, derived.as_bytes().as_slice()]);

        let mut hasher = Sha512::new();
        hasher.update(master_seed);
        hasher.update(derived.as_bytes());
        hasher.update([1u8]);
        let mut hmac_key = [0u8; HMAC_KEY_LENGTH];
        hmac_key.copy_from_slice(&hasher.finalize());

        Ok(Self {
            cipher_key,
            hmac_key,
        })
    }

    /// Key for the payload cipher.
    pub fn cipher_key(&self) -> &[u8; KEY_LENGTH] {
        &self.cipher_key
    }

    /// Base key for HMAC block authentication.
    pub fn hmac_key(&self) -> &[u8; HMAC_KEY_LENGTH] {
        &self.hmac_key
    }
}

impl fmt::Debug for FinalKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FinalKeys([REDACTED])")
    }
}

/// Fill a new buffer with random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
