use std::io::Cursor;

use tempfile::TempDir;
use vaultcodec_common::{AlgorithmId, Error, KdfId, ProtectedValue};
use vaultcodec_container::header::VERSION_4;
use vaultcodec_container::{
    CodecConfig, Compression, ContainerCodec, FormatVersion, KdfSettings, OuterHeader,
};
use vaultcodec_crypto::inner_stream::{InnerStream, ProtectedValueExt};
use vaultcodec_crypto::kdf::Argon2Variant;
use vaultcodec_crypto::params::KdfParameters;
use vaultcodec_crypto::policy::{FixedDetector, SelectionPolicy};
use vaultcodec_crypto::{CipherEngine, CompositeKey};

fn config(format: FormatVersion, cipher: CipherEngine, compression: Compression) -> CodecConfig {
    CodecConfig {
        block_size: 1024,
        format,
        cipher,
        compression,
        kdf: Some(match format {
            FormatVersion::Kdbx3 => KdfSettings::Aes { rounds: 100 },
            FormatVersion::Kdbx4 => KdfSettings::Argon2 {
                variant: Argon2Variant::Argon2id,
                memory_bytes: 1024 * 1024,
                iterations: 1,
                parallelism: 2,
            },
        }),
        ..CodecConfig::default()
    }
}

fn portable(config: CodecConfig) -> ContainerCodec {
    ContainerCodec::with_policy(config, SelectionPolicy::portable_only()).unwrap()
}

fn native(config: CodecConfig) -> ContainerCodec {
    ContainerCodec::with_policy(config, SelectionPolicy::with_detector(Box::new(FixedDetector(true)))).unwrap()
}

fn key() -> CompositeKey {
    CompositeKey::builder()
        .password(b"correct horse battery staple")
        .key_file(&[0x5au8; 48])
        .build()
        .unwrap()
}

fn body() -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..2000 {
        body.extend_from_slice(format!("<Entry><UUID>{:08x}</UUID></Entry>", i).as_bytes());
    }
    body
}

fn combinations() -> Vec<(FormatVersion, CipherEngine, Compression)> {
    let mut all = Vec::new();
    for compression in [Compression::None, Compression::Gzip] {
        for cipher in [CipherEngine::Aes, CipherEngine::Twofish] {
            all.push((FormatVersion::Kdbx3, cipher, compression));
        }
        for cipher in CipherEngine::ALL {
            all.push((FormatVersion::Kdbx4, cipher, compression));
        }
    }
    all
}

#[test]
fn test_file_roundtrip_for_every_format_and_cipher() {
    let dir = TempDir::new().unwrap();
    let body = body();

    for (i, (format, cipher, compression)) in combinations().into_iter().enumerate() {
        let codec = portable(config(format, cipher, compression));
        let path = dir.path().join(format!("vault-{}.kdbx", i));

        codec.seal_path(&path, &key(), &body).unwrap();
        let opened = codec.open_path(&path, &key()).unwrap();

        assert_eq!(opened.body.as_slice(), body.as_slice(), "{} {} {:?}", format, cipher, compression);
        assert_eq!(opened.header.format(), format);
        assert_eq!(opened.header.cipher_id, cipher.id());
        assert_eq!(opened.header.compression, compression);
    }
}

#[test]
fn test_empty_body_roundtrip() {
    for (format, cipher, compression) in combinations() {
        let codec = portable(config(format, cipher, compression));
        let sealed = codec.seal(Vec::new(), &key(), &[]).unwrap();
        let opened = codec.open(Cursor::new(sealed), &key()).unwrap();
        assert!(opened.body.is_empty());
    }
}

#[test]
fn test_native_and_portable_are_interchangeable() {
    let body = body();
    for format in [FormatVersion::Kdbx3, FormatVersion::Kdbx4] {
        let settings = config(format, CipherEngine::Aes, Compression::Gzip);

        let sealed = native(settings.clone()).seal(Vec::new(), &key(), &body).unwrap();
        let opened = portable(settings.clone()).open(&sealed[..], &key()).unwrap();
        assert_eq!(opened.body.as_slice(), body.as_slice());

        let sealed = portable(settings.clone()).seal(Vec::new(), &key(), &body).unwrap();
        let opened = native(settings).open(&sealed[..], &key()).unwrap();
        assert_eq!(opened.body.as_slice(), body.as_slice());
    }
}

#[test]
fn test_same_header_seals_identically_on_both_backends() {
    let settings = config(FormatVersion::Kdbx4, CipherEngine::Aes, Compression::None);
    let header = settings.new_header().unwrap();
    let body = body();

    let a = native(settings.clone())
        .seal_with_header(Vec::new(), &header, &key(), &body)
        .unwrap();
    let b = portable(settings)
        .seal_with_header(Vec::new(), &header, &key(), &body)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_wrong_key_is_invalid_credentials() {
    let wrong = CompositeKey::from_password(b"correct horse battery staple").unwrap();
    for (format, cipher, compression) in combinations() {
        let codec = portable(config(format, cipher, compression));
        let sealed = codec.seal(Vec::new(), &key(), b"secret body").unwrap();
        let result = codec.open(&sealed[..], &wrong);
        assert!(matches!(result, Err(Error::InvalidCredentials)), "{} {}", format, cipher);
    }
}

#[test]
fn test_tampered_body_is_rejected() {
    for (format, cipher, compression) in combinations() {
        let codec = portable(config(format, cipher, compression));
        let sealed = codec.seal(Vec::new(), &key(), &body()).unwrap();
        let header_len = OuterHeader::read(&mut &sealed[..]).unwrap().raw.len();

        let mut tampered = sealed.clone();
        let position = header_len + (sealed.len() - header_len) / 2;
        tampered[position] ^= 0x10;

        let err = codec.open(&tampered[..], &key()).unwrap_err();
        match format {
            // HMAC blocks authenticate ciphertext
            FormatVersion::Kdbx4 => assert!(err.is_integrity(), "{} {}: {:?}", format, cipher, err),
            // Hashed blocks sit under the cipher; a flipped ciphertext bit
            // may also break the padding
            FormatVersion::Kdbx3 => assert!(
                err.is_integrity() || matches!(err, Error::InvalidCredentials),
                "{} {}: {:?}",
                format,
                cipher,
                err
            ),
        }
    }
}

#[test]
fn test_tampered_header_is_rejected() {
    let codec = portable(config(FormatVersion::Kdbx4, CipherEngine::ChaCha20, Compression::Gzip));
    let sealed = codec.seal(Vec::new(), &key(), &body()).unwrap();

    // Flip a byte of the stored header hash
    let header_len = OuterHeader::read(&mut &sealed[..]).unwrap().raw.len();
    let mut tampered = sealed.clone();
    tampered[header_len + 3] ^= 0x01;
    assert!(codec.open(&tampered[..], &key()).unwrap_err().is_integrity());

    // Flip a byte of the stored header MAC
    let mut tampered = sealed;
    tampered[header_len + 32 + 3] ^= 0x01;
    assert!(matches!(codec.open(&tampered[..], &key()), Err(Error::InvalidCredentials)));
}

#[test]
fn test_truncated_container_is_rejected() {
    for format in [FormatVersion::Kdbx3, FormatVersion::Kdbx4] {
        let codec = portable(config(format, CipherEngine::Aes, Compression::None));
        let sealed = codec.seal(Vec::new(), &key(), &body()).unwrap();
        let truncated = &sealed[..sealed.len() - 100];
        assert!(codec.open(truncated, &key()).is_err());
    }
}

fn header_with(cipher_id: AlgorithmId, kdf: KdfParameters) -> OuterHeader {
    OuterHeader {
        version: VERSION_4,
        cipher_id,
        compression: Compression::None,
        master_seed: vec![0u8; 32],
        encryption_iv: vec![0u8; 16],
        kdf_parameters: kdf,
        comment: None,
        protected_stream_key: None,
        stream_start_bytes: None,
        inner_random_stream: None,
        public_custom_data: None,
    }
}

#[test]
fn test_unknown_cipher_is_rejected() {
    let codec = portable(config(FormatVersion::Kdbx4, CipherEngine::Aes, Compression::None));
    let unknown = AlgorithmId::from_bytes([0x42; 16]);
    let header = header_with(unknown, KdfParameters::aes(10));
    let bytes = header.to_bytes().unwrap();

    match codec.open(&bytes[..], &key()) {
        Err(Error::UnsupportedAlgorithm(id)) => assert_eq!(id, unknown),
        other => panic!("expected UnsupportedAlgorithm, got {:?}", other),
    }
    assert!(codec.seal_with_header(Vec::new(), &header, &key(), b"x").is_err());
}

#[test]
fn test_unknown_kdf_is_rejected() {
    let codec = portable(config(FormatVersion::Kdbx4, CipherEngine::Aes, Compression::None));
    let unknown = KdfId::from_bytes([0x24; 16]);
    let header = header_with(CipherEngine::Aes.id(), KdfParameters::new(unknown));
    let bytes = header.to_bytes().unwrap();

    match codec.open(&bytes[..], &key()) {
        Err(Error::UnknownKdf(id)) => assert_eq!(id, unknown),
        other => panic!("expected UnknownKdf, got {:?}", other),
    }
}

#[test]
fn test_kdbx3_protected_values_use_header_stream_key() {
    let codec = portable(config(FormatVersion::Kdbx3, CipherEngine::Aes, Compression::Gzip));
    let header = codec.config().new_header().unwrap();
    let stream_key = header.protected_stream_key.clone().unwrap();
    let kind = header.inner_random_stream.unwrap();

    let password = ProtectedValue::from_text("hunter2", true);
    let mut writer = InnerStream::new(kind, &stream_key).unwrap();
    let masked = password.mask_with(&mut writer);

    let mut body = b"<Value Protected=\"True\">".to_vec();
    body.extend_from_slice(&masked);
    let sealed = codec.seal_with_header(Vec::new(), &header, &key(), &body).unwrap();

    let opened = codec.open(&sealed[..], &key()).unwrap();
    let stored = &opened.body[opened.body.len() - masked.len()..];
    let reopened_key = opened.header.protected_stream_key.clone().unwrap();
    let mut reader = InnerStream::new(opened.header.inner_random_stream.unwrap(), &reopened_key).unwrap();
    assert_eq!(ProtectedValue::unmask_with(stored, &mut reader), password);
}
