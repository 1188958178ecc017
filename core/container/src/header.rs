//! Outer container header.
//!
//! # Format
//! - Signatures: `0x9AA2D903`, `0xB54BFB67` (u32 LE)
//! - Version: u32 LE, major in the high half
//! - Fields: id (u8) + size (u16 LE in KDBX 3, u32 LE in KDBX 4) + data,
//!   terminated by field 0
//!
//! KDBX 3 stores AES-KDF seed and rounds as separate fields; they are read
//! into [`KdfParameters`] so key derivation is the same for both versions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};

use crate::hashed_block::HASH_LENGTH;
use vaultcodec_common::{AlgorithmId, Error, Result};
use vaultcodec_crypto::inner_stream::InnerStreamKind;
use vaultcodec_crypto::kdf::AES_KDF_ID;
use vaultcodec_crypto::keys::MASTER_SEED_LENGTH;
use vaultcodec_crypto::params::{KdfParameters, VariantValue, PARAM_ROUNDS, SEED_LENGTH};

/// First file signature.
pub const SIGNATURE_1: u32 = 0x9AA2_D903;
/// Second file signature.
pub const SIGNATURE_2: u32 = 0xB54B_FB67;

/// KDBX 3.1.
pub const VERSION_3_1: u32 = 0x0003_0001;
/// KDBX 4.0.
pub const VERSION_4: u32 = 0x0004_0000;

const VERSION_MAJOR_MASK: u32 = 0xFFFF_0000;

/// Length of the KDBX 3 stream start bytes.
pub const STREAM_START_LENGTH: usize = 32;

const END_OF_HEADER_DATA: &[u8] = b"\r\n\r\n";

mod field {
    pub const END: u8 = 0;
    pub const COMMENT: u8 = 1;
    pub const CIPHER_ID: u8 = 2;
    pub const COMPRESSION: u8 = 3;
    pub const MASTER_SEED: u8 = 4;
    pub const TRANSFORM_SEED: u8 = 5;
    pub const TRANSFORM_ROUNDS: u8 = 6;
    pub const ENCRYPTION_IV: u8 = 7;
    pub const PROTECTED_STREAM_KEY: u8 = 8;
    pub const STREAM_START_BYTES: u8 = 9;
    pub const INNER_RANDOM_STREAM_ID: u8 = 10;
    pub const KDF_PARAMETERS: u8 = 11;
    pub const PUBLIC_CUSTOM_DATA: u8 = 12;
}

/// Container format generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    Kdbx3,
    Kdbx4,
}

impl FormatVersion {
    /// Version number written for this format.
    pub fn version(&self) -> u32 {
        match self {
            FormatVersion::Kdbx3 => VERSION_3_1,
            FormatVersion::Kdbx4 => VERSION_4,
        }
    }

    /// Classify a stored version number.
    ///
    /// # Errors
    /// - `Format` for major versions below 3 or above 4
    pub fn from_version(version: u32) -> Result<Self> {
        match (version & VERSION_MAJOR_MASK) >> 16 {
            3 => Ok(FormatVersion::Kdbx3),
            4 => Ok(FormatVersion::Kdbx4),
            major => Err(Error::Format(format!("Unsupported container version {}.{}", major, version & 0xFFFF))),
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Kdbx3 => f.write_str("KDBX 3.1"),
            FormatVersion::Kdbx4 => f.write_str("KDBX 4"),
        }
    }
}

/// Body compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    fn from_flag(flag: u32) -> Result<Self> {
        match flag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            other => Err(Error::Format(format!("Unrecognized compression flag: {}", other))),
        }
    }

    fn flag(&self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
        }
    }
}

/// Unencrypted header preceding the container body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterHeader {
    /// Stored version number.
    pub version: u32,
    /// Payload cipher identifier; resolved by the pipeline.
    pub cipher_id: AlgorithmId,
    pub compression: Compression,
    pub master_seed: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub kdf_parameters: KdfParameters,
    pub comment: Option<Vec<u8>>,
    /// KDBX 3: key for the inner protected-value stream.
    pub protected_stream_key: Option<Vec<u8>>,
    /// KDBX 3: plaintext prefix used to detect a wrong key.
    pub stream_start_bytes: Option<Vec<u8>>,
    /// KDBX 3: inner protected-value stream algorithm.
    pub inner_random_stream: Option<InnerStreamKind>,
    /// KDBX 4: opaque public custom data.
    pub public_custom_data: Option<Vec<u8>>,
}

/// A header together with the exact bytes it was read from.
#[derive(Debug, Clone)]
pub struct ParsedHeader {
    pub header: OuterHeader,
    pub raw: Vec<u8>,
    pub hash: [u8; HASH_LENGTH],
}

#[derive(Default)]
struct FieldSet {
    comment: Option<Vec<u8>>,
    cipher_id: Option<AlgorithmId>,
    compression: Option<Compression>,
    master_seed: Option<Vec<u8>>,
    transform_seed: Option<Vec<u8>>,
    transform_rounds: Option<u64>,
    encryption_iv: Option<Vec<u8>>,
    protected_stream_key: Option<Vec<u8>>,
    stream_start_bytes: Option<Vec<u8>>,
    inner_random_stream: Option<InnerStreamKind>,
    kdf_parameters: Option<KdfParameters>,
    public_custom_data: Option<Vec<u8>>,
}

fn missing(name: &str) -> Error {
    Error::Format(format!("Header field missing: {}", name))
}

fn le_u32(data: &[u8], name: &str) -> Result<u32> {
    let bytes: [u8; 4] = data
        .try_into()
        .map_err(|_| Error::Format(format!("Invalid {} field length: {}", name, data.len())))?;
    Ok(u32::from_le_bytes(bytes))
}

fn le_u64(data: &[u8], name: &str) -> Result<u64> {
    let bytes: [u8; 8] = data
        .try_into()
        .map_err(|_| Error::Format(format!("Invalid {} field length: {}", name, data.len())))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Reader that keeps a copy of every byte it yields.
struct Recorder<'a, R> {
    inner: &'a mut R,
    raw: Vec<u8>,
}

impl<R: Read> Recorder<'_, R> {
    fn take(&mut self, len: usize) -> Result<&[u8]> {
        let start = self.raw.len();
        let read = (&mut *self.inner).take(len as u64).read_to_end(&mut self.raw)?;
        if read != len {
            return Err(Error::Format("Header ended early".to_string()));
        }
        Ok(&self.raw[start..])
    }
}

impl OuterHeader {
    /// Container format generation.
    pub fn format(&self) -> FormatVersion {
        if self.version & VERSION_MAJOR_MASK >= VERSION_4 & VERSION_MAJOR_MASK {
            FormatVersion::Kdbx4
        } else {
            FormatVersion::Kdbx3
        }
    }

    /// Read and validate a header, keeping its raw bytes and SHA-256.
    ///
    /// # Errors
    /// - `Format` for bad signatures, unsupported versions, malformed or
    ///   missing fields, and unknown field ids
    pub fn read<R: Read>(reader: &mut R) -> Result<ParsedHeader> {
        let mut recorder = Recorder {
            inner: reader,
            raw: Vec::new(),
        };

        let sig1 = le_u32(recorder.take(4)?, "signature")?;
        let sig2 = le_u32(recorder.take(4)?, "signature")?;
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2 {
            return Err(Error::Format("Not a KDBX container".to_string()));
        }
        let version = le_u32(recorder.take(4)?, "version")?;
        let format = FormatVersion::from_version(version)?;

        let mut fields = FieldSet::default();
        loop {
            let id = recorder.take(1)?[0];
            let size = match format {
                FormatVersion::Kdbx3 => {
                    let bytes = recorder.take(2)?;
                    u16::from_le_bytes([bytes[0], bytes[1]]) as usize
                }
                FormatVersion::Kdbx4 => le_u32(recorder.take(4)?, "size")? as usize,
            };
            let data = recorder.take(size)?.to_vec();
            if id == field::END {
                break;
            }
            fields.assign(id, data, format)?;
        }

        let header = fields.into_header(version, format)?;
        let raw = recorder.raw;
        let hash: [u8; HASH_LENGTH] = Sha256::digest(&raw).into();
        tracing::debug!(
            %format,
            cipher = %header.cipher_id,
            compression = ?header.compression,
            size = raw.len(),
            "Read container header"
        );
        Ok(ParsedHeader { header, raw, hash })
    }

    /// Serialize the header.
    ///
    /// # Errors
    /// - `Format` if a KDBX 3 header carries a KDF other than AES-KDF, or a
    ///   field does not fit its size prefix
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let format = self.format();
        let mut out = Vec::new();
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());

        let mut put = |id: u8, data: &[u8]| -> Result<()> {
            out.push(id);
            match format {
                FormatVersion::Kdbx3 => {
                    let size = u16::try_from(data.len())
                        .map_err(|_| Error::Format(format!("Header field {} too large", id)))?;
                    out.extend_from_slice(&size.to_le_bytes());
                }
                FormatVersion::Kdbx4 => {
                    let size = u32::try_from(data.len())
                        .map_err(|_| Error::Format(format!("Header field {} too large", id)))?;
                    out.extend_from_slice(&size.to_le_bytes());
                }
            }
            out.extend_from_slice(data);
            Ok(())
        };

        if let Some(comment) = &self.comment {
            put(field::COMMENT, comment)?;
        }
        put(field::CIPHER_ID, self.cipher_id.as_bytes())?;
        put(field::COMPRESSION, &self.compression.flag().to_le_bytes())?;
        put(field::MASTER_SEED, &self.master_seed)?;

        match format {
            FormatVersion::Kdbx3 => {
                if self.kdf_parameters.kdf_id()? != AES_KDF_ID {
                    return Err(Error::Format("KDBX 3 supports only AES-KDF".to_string()));
                }
                let rounds = self
                    .kdf_parameters
                    .dictionary()
                    .get_u64(PARAM_ROUNDS)
                    .ok_or_else(|| missing("transform rounds"))?;
                put(field::TRANSFORM_SEED, self.kdf_parameters.seed())?;
                put(field::TRANSFORM_ROUNDS, &rounds.to_le_bytes())?;
                put(field::ENCRYPTION_IV, &self.encryption_iv)?;
                put(
                    field::PROTECTED_STREAM_KEY,
                    self.protected_stream_key
                        .as_deref()
                        .ok_or_else(|| missing("protected stream key"))?,
                )?;
                put(
                    field::STREAM_START_BYTES,
                    self.stream_start_bytes
                        .as_deref()
                        .ok_or_else(|| missing("stream start bytes"))?,
                )?;
                let stream = self
                    .inner_random_stream
                    .ok_or_else(|| missing("inner random stream id"))?;
                put(field::INNER_RANDOM_STREAM_ID, &stream.id().to_le_bytes())?;
            }
            FormatVersion::Kdbx4 => {
                put(field::ENCRYPTION_IV, &self.encryption_iv)?;
                put(field::KDF_PARAMETERS, &self.kdf_parameters.to_bytes())?;
                if let Some(custom) = &self.public_custom_data {
                    put(field::PUBLIC_CUSTOM_DATA, custom)?;
                }
            }
        }
        put(field::END, END_OF_HEADER_DATA)?;
        Ok(out)
    }

    /// Write the header, returning the bytes written.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<Vec<u8>> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(bytes)
    }
}

impl FieldSet {
    fn assign(&mut self, id: u8, data: Vec<u8>, format: FormatVersion) -> Result<()> {
        let v3_only = |name: &str| -> Result<()> {
            if format == FormatVersion::Kdbx4 {
                Err(Error::Format(format!("Header field {} is not valid in KDBX 4", name)))
            } else {
                Ok(())
            }
        };

        match id {
            field::COMMENT => self.comment = Some(data),
            field::CIPHER_ID => {
                if data.len() != 16 {
                    return Err(Error::Format("Invalid cipher ID".to_string()));
                }
                self.cipher_id = Some(AlgorithmId::from_slice(&data)?);
            }
            field::COMPRESSION => {
                self.compression = Some(Compression::from_flag(le_u32(&data, "compression")?)?);
            }
            field::MASTER_SEED => {
                if data.len() != MASTER_SEED_LENGTH {
                    return Err(Error::Format(format!("Invalid master seed length: {}", data.len())));
                }
                self.master_seed = Some(data);
            }
            field::TRANSFORM_SEED => {
                v3_only("transform seed")?;
                self.transform_seed = Some(data);
            }
            field::TRANSFORM_ROUNDS => {
                v3_only("transform rounds")?;
                self.transform_rounds = Some(le_u64(&data, "transform rounds")?);
            }
            field::ENCRYPTION_IV => self.encryption_iv = Some(data),
            field::PROTECTED_STREAM_KEY => {
                v3_only("protected stream key")?;
                self.protected_stream_key = Some(data);
            }
            field::STREAM_START_BYTES => {
                v3_only("stream start bytes")?;
                self.stream_start_bytes = Some(data);
            }
            field::INNER_RANDOM_STREAM_ID => {
                v3_only("inner random stream id")?;
                self.inner_random_stream =
                    Some(InnerStreamKind::from_id(le_u32(&data, "inner random stream id")?)?);
            }
            field::KDF_PARAMETERS => {
                if format == FormatVersion::Kdbx3 {
                    return Err(Error::Format("KDF parameters field requires KDBX 4".to_string()));
                }
                self.kdf_parameters = Some(KdfParameters::from_bytes(&data)?);
            }
            field::PUBLIC_CUSTOM_DATA => self.public_custom_data = Some(data),
            other => return Err(Error::Format(format!("Invalid header field id: {}", other))),
        }
        Ok(())
    }

    fn into_header(self, version: u32, format: FormatVersion) -> Result<OuterHeader> {
        let kdf_parameters = match format {
            FormatVersion::Kdbx3 => {
                let seed = self.transform_seed.ok_or_else(|| missing("transform seed"))?;
                if seed.len() != SEED_LENGTH {
                    return Err(Error::Format(format!("Invalid transform seed length: {}", seed.len())));
                }
                let rounds = self.transform_rounds.ok_or_else(|| missing("transform rounds"))?;
                let mut params = KdfParameters::new(AES_KDF_ID);
                params
                    .dictionary_mut()
                    .set(PARAM_ROUNDS, VariantValue::UInt64(rounds));
                params.set_seed(seed);
                params
            }
            FormatVersion::Kdbx4 => self.kdf_parameters.ok_or_else(|| missing("KDF parameters"))?,
        };

        if format == FormatVersion::Kdbx3 {
            match &self.stream_start_bytes {
                Some(bytes) if bytes.len() == STREAM_START_LENGTH => {}
                Some(bytes) => {
                    return Err(Error::Format(format!("Invalid stream start bytes length: {}", bytes.len())));
                }
                None => return Err(missing("stream start bytes")),
            }
            if self.protected_stream_key.is_none() {
                return Err(missing("protected stream key"));
            }
            if self.inner_random_stream.is_none() {
                return Err(missing("inner random stream id"));
            }
        }

        Ok(OuterHeader {
            version,
            cipher_id: self.cipher_id.ok_or_else(|| missing("cipher id"))?,
            compression: self.compression.ok_or_else(|| missing("compression flags"))?,
            master_seed: self.master_seed.ok_or_else(|| missing("master seed"))?,
            encryption_iv: self.encryption_iv.ok_or_else(|| missing("encryption IV"))?,
            kdf_parameters,
            comment: self.comment,
            protected_stream_key: self.protected_stream_key,
            stream_start_bytes: self.stream_start_bytes,
            inner_random_stream: self.inner_random_stream,
            public_custom_data: self.public_custom_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultcodec_crypto::cipher::{AES_ID, CHACHA20_ID};
    use vaultcodec_crypto::kdf::Argon2Variant;

    fn kdbx4_header() -> OuterHeader {
        OuterHeader {
            version: VERSION_4,
            cipher_id: CHACHA20_ID,
            compression: Compression::Gzip,
            master_seed: vec![1u8; 32],
            encryption_iv: vec![2u8; 12],
            kdf_parameters: KdfParameters::argon2(Argon2Variant::Argon2d, 1024 * 1024, 2, 2),
            comment: None,
            protected_stream_key: None,
            stream_start_bytes: None,
            inner_random_stream: None,
            public_custom_data: None,
        }
    }

    fn kdbx3_header() -> OuterHeader {
        OuterHeader {
            version: VERSION_3_1,
            cipher_id: AES_ID,
            compression: Compression::None,
            master_seed: vec![1u8; 32],
            encryption_iv: vec![2u8; 16],
            kdf_parameters: KdfParameters::aes(6000),
            comment: None,
            protected_stream_key: Some(vec![3u8; 32]),
            stream_start_bytes: Some(vec![4u8; 32]),
            inner_random_stream: Some(InnerStreamKind::Salsa20),
            public_custom_data: None,
        }
    }

    #[test]
    fn test_kdbx4_roundtrip_keeps_raw_bytes() {
        let header = kdbx4_header();
        let bytes = header.to_bytes().unwrap();

        let mut trailing = bytes.clone();
        trailing.extend_from_slice(b"body follows");
        let mut reader = &trailing[..];
        let parsed = OuterHeader::read(&mut reader).unwrap();

        assert_eq!(parsed.header, header);
        assert_eq!(parsed.raw, bytes);
        assert_eq!(parsed.hash.as_slice(), Sha256::digest(&bytes).as_slice());
        assert_eq!(reader, b"body follows");
        assert_eq!(parsed.header.format(), FormatVersion::Kdbx4);
    }

    #[test]
    fn test_kdbx3_roundtrip_maps_transform_fields() {
        let header = kdbx3_header();
        let bytes = header.to_bytes().unwrap();
        let parsed = OuterHeader::read(&mut &bytes[..]).unwrap();

        assert_eq!(parsed.header.format(), FormatVersion::Kdbx3);
        assert_eq!(parsed.header.kdf_parameters.kdf_id().unwrap(), AES_KDF_ID);
        assert_eq!(parsed.header.kdf_parameters.dictionary().get_u64(PARAM_ROUNDS), Some(6000));
        assert_eq!(parsed.header.kdf_parameters.seed(), header.kdf_parameters.seed());
        assert_eq!(parsed.header.inner_random_stream, Some(InnerStreamKind::Salsa20));
    }

    #[test]
    fn test_kdbx3_rejects_argon2() {
        let mut header = kdbx3_header();
        header.kdf_parameters = KdfParameters::argon2(Argon2Variant::Argon2id, 1024 * 1024, 1, 1);
        assert!(header.to_bytes().is_err());
    }

    #[test]
    fn test_bad_signature() {
        let mut bytes = kdbx4_header().to_bytes().unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(OuterHeader::read(&mut &bytes[..]), Err(Error::Format(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut header = kdbx4_header();
        header.version = 0x0005_0000;
        let bytes = header.to_bytes().unwrap();
        assert!(OuterHeader::read(&mut &bytes[..]).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        bytes.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        bytes.extend_from_slice(&VERSION_4.to_le_bytes());
        bytes.push(42);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(0);
        assert!(OuterHeader::read(&mut &bytes[..]).is_err());
    }

    #[test]
    fn test_truncated_header() {
        let bytes = kdbx4_header().to_bytes().unwrap();
        assert!(OuterHeader::read(&mut &bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_missing_kdf_parameters() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        bytes.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        bytes.extend_from_slice(&VERSION_4.to_le_bytes());
        bytes.push(field::END);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(OuterHeader::read(&mut &bytes[..]), Err(Error::Format(_))));
    }

    #[test]
    fn test_unknown_cipher_id_is_kept_for_resolution() {
        let mut header = kdbx4_header();
        header.cipher_id = AlgorithmId::from_bytes([0xAB; 16]);
        let bytes = header.to_bytes().unwrap();
        let parsed = OuterHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(parsed.header.cipher_id, AlgorithmId::from_bytes([0xAB; 16]));
    }
}
