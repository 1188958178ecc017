//! Cryptographic primitives for the vault codec.
//!
//! This module provides:
//! - Payload cipher engines (AES-256-CBC, Twofish-CBC, ChaCha20) resolved by
//!   algorithm identifier, with streaming adapters
//! - Key derivation (AES-KDF, Argon2d, Argon2id) resolved from a typed
//!   parameter dictionary
//! - Composite, derived and final key material with automatic zeroization,
//!   including XML key files
//! - The inner keystream used to mask protected values
//! - Native acceleration selection with portable fallback
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Native and portable implementations produce identical output

pub mod cipher;
pub mod inner_stream;
pub mod kdf;
pub mod key_file;
pub mod keys;
pub mod params;
pub mod policy;
pub mod stream;

pub use crate::cipher::{Cipher, CipherEngine, CipherMode};
pub use inner_stream::{InnerStream, InnerStreamKind, ProtectedValueExt};
pub use kdf::{derive_key, Argon2Variant, KeyTransformer};
pub use keys::{CompositeKey, DerivedKey, FinalKeys};
pub use params::{KdfParameters, VariantDictionary, VariantValue};
pub use policy::{Accelerated, Backend, NativeDetector, SelectionPolicy};
pub use stream::{CipherReader, CipherWriter};
