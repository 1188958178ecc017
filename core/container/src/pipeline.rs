//! Open and seal containers.
//!
//! Decrypt path:
//! header → key derivation → (KDBX 3) cipher → start bytes check → hashed
//! blocks, or (KDBX 4) header hash and MAC → HMAC blocks → cipher; then
//! optional gzip. The encrypt path is the mirror image.
//!
//! The whole body is read before anything is returned, so a failure at any
//! layer aborts the open without exposing partially decoded data.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::config::CodecConfig;
use crate::hashed_block::{HashedBlockReader, HashedBlockWriter, HASH_LENGTH};
use crate::header::{Compression, FormatVersion, OuterHeader, STREAM_START_LENGTH};
use crate::hmac_block::{header_mac, verify_header_mac, HmacBlockReader, HmacBlockWriter, MAC_LENGTH};
use vaultcodec_common::{Error, Result};
use vaultcodec_crypto::cipher::{CipherEngine, CipherMode};
use vaultcodec_crypto::kdf::KeyTransformer;
use vaultcodec_crypto::keys::{CompositeKey, FinalKeys};
use vaultcodec_crypto::policy::SelectionPolicy;
use vaultcodec_crypto::stream::{CipherReader, CipherWriter};

/// A decrypted, verified container.
pub struct OpenedContainer {
    pub header: OuterHeader,
    /// Decompressed body, handed to the structured-data layer.
    pub body: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for OpenedContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedContainer")
            .field("header", &self.header)
            .field("body", &format_args!("[REDACTED; {} bytes]", self.body.len()))
            .finish()
    }
}

/// Opens and seals containers with one configuration and policy.
#[derive(Debug)]
pub struct ContainerCodec {
    config: CodecConfig,
    policy: SelectionPolicy,
}

impl ContainerCodec {
    /// Create a codec using the policy described by `config`.
    ///
    /// # Errors
    /// - Returns error if the configuration does not validate
    pub fn new(config: CodecConfig) -> Result<Self> {
        let policy = config.selection_policy();
        Self::with_policy(config, policy)
    }

    /// Create a codec with an explicit selection policy.
    pub fn with_policy(config: CodecConfig, policy: SelectionPolicy) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, policy })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    fn derive(&self, header: &OuterHeader, key: &CompositeKey) -> Result<(CipherEngine, FinalKeys)> {
        let engine = CipherEngine::resolve(&header.cipher_id)?;
        let transformer = KeyTransformer::resolve(&header.kdf_parameters)?;
        debug!(cipher = engine.name(), kdf = transformer.name(), "Resolved container algorithms");

        let derived = transformer.transform_with(&self.policy, header.kdf_parameters.seed(), key)?;
        let keys = FinalKeys::derive(&header.master_seed, &derived)?;
        Ok((engine, keys))
    }

    /// Decrypt and verify a container.
    ///
    /// # Errors
    /// - `Format` for a malformed header
    /// - `UnsupportedAlgorithm` / `UnknownKdf` for unregistered identifiers
    /// - `InvalidCredentials` if the key does not open the container
    /// - `IntegrityViolation` if any block fails verification
    pub fn open<R: Read>(&self, mut reader: R, key: &CompositeKey) -> Result<OpenedContainer> {
        let parsed = OuterHeader::read(&mut reader)?;
        let header = parsed.header;
        let (engine, keys) = self.derive(&header, key)?;
        let format = header.format();

        let mut body = Zeroizing::new(Vec::new());
        match format {
            FormatVersion::Kdbx3 => {
                let cipher = engine.init_with(&self.policy, CipherMode::Decrypt, keys.cipher_key(), &header.encryption_iv)?;
                let mut plain = CipherReader::new(reader, cipher);

                let expected = header
                    .stream_start_bytes
                    .as_deref()
                    .ok_or_else(|| Error::Format("Header field missing: stream start bytes".to_string()))?;
                let mut start = Zeroizing::new([0u8; STREAM_START_LENGTH]);
                read_exact_body(&mut plain, start.as_mut_slice())?;
                if !bool::from(start.as_slice().ct_eq(expected)) {
                    return Err(Error::InvalidCredentials);
                }

                decompress(HashedBlockReader::new(plain), header.compression, &mut body)?;
            }
            FormatVersion::Kdbx4 => {
                let mut stored_hash = [0u8; HASH_LENGTH];
                read_exact_body(&mut reader, &mut stored_hash)?;
                if !bool::from(stored_hash.as_slice().ct_eq(parsed.hash.as_slice())) {
                    return Err(Error::IntegrityViolation("Header hash mismatch".to_string()));
                }

                let mut stored_mac = [0u8; MAC_LENGTH];
                read_exact_body(&mut reader, &mut stored_mac)?;
                if !verify_header_mac(keys.hmac_key(), &parsed.raw, &stored_mac)? {
                    return Err(Error::InvalidCredentials);
                }

                let cipher = engine.init_with(&self.policy, CipherMode::Decrypt, keys.cipher_key(), &header.encryption_iv)?;
                let plain = CipherReader::new(HmacBlockReader::new(reader, keys.hmac_key()), cipher);
                decompress(plain, header.compression, &mut body)?;
            }
        }

        info!(%format, cipher = engine.name(), size = body.len(), "Opened container");
        Ok(OpenedContainer { header, body })
    }

    /// Decrypt and verify a container file.
    pub fn open_path(&self, path: impl AsRef<Path>, key: &CompositeKey) -> Result<OpenedContainer> {
        let file = File::open(path.as_ref())?;
        self.open(BufReader::new(file), key)
    }

    /// Seal `body` under a fresh header built from the configuration.
    pub fn seal<W: Write>(&self, writer: W, key: &CompositeKey, body: &[u8]) -> Result<W> {
        let header = self.config.new_header()?;
        self.seal_with_header(writer, &header, key, body)
    }

    /// Seal `body` under an explicit header.
    ///
    /// # Preconditions
    /// - The header's seeds and IV must be fresh for every seal
    ///
    /// # Errors
    /// - `UnsupportedAlgorithm` / `UnknownKdf` for unregistered identifiers
    /// - `Format` if the header cannot be serialized
    pub fn seal_with_header<W: Write>(
        &self,
        mut writer: W,
        header: &OuterHeader,
        key: &CompositeKey,
        body: &[u8],
    ) -> Result<W> {
        let (engine, keys) = self.derive(header, key)?;
        let format = header.format();
        let raw = header.write(&mut writer)?;

        let writer = match format {
            FormatVersion::Kdbx3 => {
                let start = header
                    .stream_start_bytes
                    .as_deref()
                    .ok_or_else(|| Error::Format("Header field missing: stream start bytes".to_string()))?;
                let cipher = engine.init_with(&self.policy, CipherMode::Encrypt, keys.cipher_key(), &header.encryption_iv)?;
                let mut encrypted = CipherWriter::new(writer, cipher);
                encrypted.write_all(start)?;

                let framed = HashedBlockWriter::with_block_size(encrypted, self.config.block_size);
                let framed = compress(framed, header.compression, body)?;
                framed.finish()?.finish()?
            }
            FormatVersion::Kdbx4 => {
                writer.write_all(&Sha256::digest(&raw))?;
                writer.write_all(&header_mac(keys.hmac_key(), &raw)?)?;

                let framed = HmacBlockWriter::with_block_size(writer, keys.hmac_key(), self.config.block_size);
                let cipher = engine.init_with(&self.policy, CipherMode::Encrypt, keys.cipher_key(), &header.encryption_iv)?;
                let encrypted = compress(CipherWriter::new(framed, cipher), header.compression, body)?;
                encrypted.finish()?.finish()?
            }
        };

        info!(%format, cipher = engine.name(), size = body.len(), "Sealed container");
        Ok(writer)
    }

    /// Seal `body` into a new file at `path`.
    pub fn seal_path(&self, path: impl AsRef<Path>, key: &CompositeKey, body: &[u8]) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = self.seal(BufWriter::new(file), key, body)?;
        writer.flush()?;
        Ok(())
    }
}

fn read_exact_body<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::IntegrityViolation("Container body is truncated".to_string())
        } else {
            Error::from(e)
        }
    })
}

fn decompress<R: Read>(reader: R, compression: Compression, out: &mut Vec<u8>) -> Result<()> {
    match compression {
        Compression::None => {
            let mut reader = reader;
            reader.read_to_end(out)?;
        }
        Compression::Gzip => {
            // Verify every block before inflating
            let mut compressed = Zeroizing::new(Vec::new());
            let mut reader = reader;
            reader.read_to_end(&mut compressed)?;
            GzDecoder::new(compressed.as_slice()).read_to_end(out)?;
        }
    }
    Ok(())
}

fn compress<W: Write>(mut writer: W, compression: Compression, body: &[u8]) -> Result<W> {
    match compression {
        Compression::None => {
            writer.write_all(body)?;
            Ok(writer)
        }
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            encoder.write_all(body)?;
            Ok(encoder.finish()?)
        }
    }
}
