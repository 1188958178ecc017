//! Codec configuration.

use serde::{Deserialize, Serialize};

use crate::hashed_block::DEFAULT_BLOCK_SIZE;
use crate::header::{Compression, FormatVersion, OuterHeader, STREAM_START_LENGTH};
use vaultcodec_common::{Error, Result};
use vaultcodec_crypto::cipher::CipherEngine;
use vaultcodec_crypto::inner_stream::InnerStreamKind;
use vaultcodec_crypto::kdf::{
    Argon2Variant, KeyTransformer, DEFAULT_AES_ROUNDS, DEFAULT_ARGON2_ITERATIONS,
    DEFAULT_ARGON2_MEMORY, DEFAULT_ARGON2_PARALLELISM,
};
use vaultcodec_crypto::keys::{random_bytes, KEY_LENGTH, MASTER_SEED_LENGTH};
use vaultcodec_crypto::params::KdfParameters;
use vaultcodec_crypto::policy::{SelectionPolicy, DEFAULT_DEVICE_EXCLUSIONS};

/// Key derivation settings used when sealing a new container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KdfSettings {
    Aes {
        rounds: u64,
    },
    Argon2 {
        variant: Argon2Variant,
        /// Memory in bytes.
        memory_bytes: u64,
        iterations: u64,
        parallelism: u32,
    },
}

impl KdfSettings {
    /// Default settings for a container format.
    pub fn default_for(format: FormatVersion) -> Self {
        match format {
            FormatVersion::Kdbx3 => KdfSettings::Aes {
                rounds: DEFAULT_AES_ROUNDS,
            },
            FormatVersion::Kdbx4 => KdfSettings::Argon2 {
                variant: Argon2Variant::Argon2d,
                memory_bytes: DEFAULT_ARGON2_MEMORY,
                iterations: DEFAULT_ARGON2_ITERATIONS,
                parallelism: DEFAULT_ARGON2_PARALLELISM,
            },
        }
    }

    /// Settings suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        KdfSettings::Argon2 {
            variant: Argon2Variant::Argon2id,
            memory_bytes: 64 * 1024 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }

    /// Moderate settings for mobile devices.
    pub fn moderate() -> Self {
        KdfSettings::Argon2 {
            variant: Argon2Variant::Argon2id,
            memory_bytes: 32 * 1024 * 1024,
            iterations: 3,
            parallelism: 2,
        }
    }

    /// Higher security settings that may take several seconds.
    pub fn sensitive() -> Self {
        KdfSettings::Argon2 {
            variant: Argon2Variant::Argon2id,
            memory_bytes: 256 * 1024 * 1024,
            iterations: 4,
            parallelism: 4,
        }
    }

    /// Build dictionary parameters with a fresh random seed.
    pub fn to_parameters(&self) -> KdfParameters {
        match *self {
            KdfSettings::Aes { rounds } => KdfParameters::aes(rounds),
            KdfSettings::Argon2 {
                variant,
                memory_bytes,
                iterations,
                parallelism,
            } => KdfParameters::argon2(variant, memory_bytes, iterations, parallelism),
        }
    }
}

/// Settings controlling how containers are sealed and which backends run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Frame size of the block codec.
    pub block_size: usize,
    /// Container format written by `seal`.
    pub format: FormatVersion,
    /// Payload cipher written by `seal`.
    pub cipher: CipherEngine,
    /// Body compression written by `seal`.
    pub compression: Compression,
    /// Key derivation written by `seal`; format default when unset.
    pub kdf: Option<KdfSettings>,
    /// Allow accelerated implementations.
    pub native_acceleration: bool,
    /// Model of the executing device, matched against the exclusion list.
    pub device_model: Option<String>,
    /// Device models excluded from acceleration.
    pub device_exclusions: Vec<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            format: FormatVersion::Kdbx4,
            cipher: CipherEngine::Aes,
            compression: Compression::Gzip,
            kdf: None,
            native_acceleration: true,
            device_model: None,
            device_exclusions: DEFAULT_DEVICE_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CodecConfig {
    /// Key derivation settings in effect.
    pub fn kdf_settings(&self) -> KdfSettings {
        self.kdf
            .clone()
            .unwrap_or_else(|| KdfSettings::default_for(self.format))
    }

    /// Check the settings are consistent.
    ///
    /// # Errors
    /// - Block size is zero or does not fit a frame length
    /// - KDBX 3 combined with ChaCha20 or a KDF other than AES-KDF
    /// - KDF settings out of range
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || u32::try_from(self.block_size).is_err() {
            return Err(Error::InvalidInput(format!("Invalid block size: {}", self.block_size)));
        }

        let kdf = self.kdf_settings();
        if self.format == FormatVersion::Kdbx3 {
            if self.cipher == CipherEngine::ChaCha20 {
                return Err(Error::InvalidInput("KDBX 3 does not support ChaCha20".to_string()));
            }
            if !matches!(kdf, KdfSettings::Aes { .. }) {
                return Err(Error::InvalidInput("KDBX 3 supports only AES-KDF".to_string()));
            }
        }

        KeyTransformer::resolve(&kdf.to_parameters()).map(|_| ())
    }

    /// Build the acceleration policy for these settings.
    pub fn selection_policy(&self) -> SelectionPolicy {
        let policy = SelectionPolicy::new()
            .with_native(self.native_acceleration)
            .with_exclusions(self.device_exclusions.iter().cloned());
        match &self.device_model {
            Some(model) => policy.with_device_model(model.clone()),
            None => policy,
        }
    }

    /// Build a fresh header with random seeds and IV.
    ///
    /// # Errors
    /// - Returns error if the settings do not validate
    pub fn new_header(&self) -> Result<OuterHeader> {
        self.validate()?;

        let (protected_stream_key, stream_start_bytes, inner_random_stream) = match self.format {
            FormatVersion::Kdbx3 => (
                Some(random_bytes(KEY_LENGTH)),
                Some(random_bytes(STREAM_START_LENGTH)),
                Some(InnerStreamKind::Salsa20),
            ),
            FormatVersion::Kdbx4 => (None, None, None),
        };

        Ok(OuterHeader {
            version: self.format.version(),
            cipher_id: self.cipher.id(),
            compression: self.compression,
            master_seed: random_bytes(MASTER_SEED_LENGTH),
            encryption_iv: random_bytes(self.cipher.iv_length()),
            kdf_parameters: self.kdf_settings().to_parameters(),
            comment: None,
            protected_stream_key,
            stream_start_bytes,
            inner_random_stream,
            public_custom_data: None,
        })
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
