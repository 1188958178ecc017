//! Container codec.
//!
//! Turns an encrypted container into an authenticated plaintext body and
//! back:
//! - Outer header parsing and serialization (KDBX 3.1 and KDBX 4)
//! - Hash-verified block framing for the KDBX 3 body
//! - HMAC-authenticated block framing for the KDBX 4 body
//! - The open/seal pipeline tying key derivation, ciphers, framing and
//!   compression together
//!
//! The body's structure (inner header, XML) belongs to the caller.

pub mod config;
pub mod hashed_block;
pub mod header;
pub mod hmac_block;
pub mod pipeline;

pub use config::{CodecConfig, KdfSettings};
pub use hashed_block::{HashedBlockReader, HashedBlockWriter, DEFAULT_BLOCK_SIZE};
pub use header::{Compression, FormatVersion, OuterHeader, ParsedHeader};
pub use hmac_block::{HmacBlockReader, HmacBlockWriter};
pub use pipeline::{ContainerCodec, OpenedContainer};
