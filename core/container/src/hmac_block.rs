//! HMAC-authenticated block framing for the KDBX4 body.
//!
//! # Format
//! - Frame: HMAC-SHA256 (32) + length (u32 LE) + payload
//! - The terminal frame has length 0 and is authenticated like any other
//! - Block key: SHA-512(index as u64 LE || HMAC base key)
//! - MAC input: index (u64 LE) || length (u32 LE) || payload
//!
//! Frames operate on ciphertext, so tampering is rejected before decryption.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

use crate::hashed_block::{read_exact_or_truncated, DEFAULT_BLOCK_SIZE};
use vaultcodec_common::{Error, Result};
use vaultcodec_crypto::keys::HMAC_KEY_LENGTH;

type HmacSha256 = Hmac<Sha256>;

/// Length of a block MAC.
pub const MAC_LENGTH: usize = 32;

/// Block index reserved for the header MAC.
pub const HEADER_INDEX: u64 = u64::MAX;

const FRAME_HEADER_LENGTH: usize = MAC_LENGTH + 4;

/// Per-block HMAC key.
pub fn block_key(hmac_key: &[u8; HMAC_KEY_LENGTH], index: u64) -> Zeroizing<[u8; 64]> {
    let mut hasher = Sha512::new();
    hasher.update(index.to_le_bytes());
    hasher.update(hmac_key);
    let mut key = Zeroizing::new([0u8; 64]);
    key.copy_from_slice(&hasher.finalize());
    key
}

fn block_mac(hmac_key: &[u8; HMAC_KEY_LENGTH], index: u64) -> Result<HmacSha256> {
    let key = block_key(hmac_key, index);
    <HmacSha256 as Mac>::new_from_slice(key.as_slice())
        .map_err(|e| Error::Crypto(format!("HMAC init failed: {}", e)))
}

/// MAC authenticating the serialized outer header.
pub fn header_mac(hmac_key: &[u8; HMAC_KEY_LENGTH], header: &[u8]) -> Result<[u8; MAC_LENGTH]> {
    let mut mac = block_mac(hmac_key, HEADER_INDEX)?;
    mac.update(header);
    Ok(mac.finalize().into_bytes().into())
}

/// Check a stored header MAC in constant time.
pub fn verify_header_mac(hmac_key: &[u8; HMAC_KEY_LENGTH], header: &[u8], stored: &[u8]) -> Result<bool> {
    let mut mac = block_mac(hmac_key, HEADER_INDEX)?;
    mac.update(header);
    Ok(mac.verify_slice(stored).is_ok())
}

fn frame_mac(hmac_key: &[u8; HMAC_KEY_LENGTH], index: u64, payload: &[u8]) -> Result<HmacSha256> {
    let length = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidInput("Block exceeds 4 GiB".to_string()))?;
    let mut mac = block_mac(hmac_key, index)?;
    mac.update(&index.to_le_bytes());
    mac.update(&length.to_le_bytes());
    mac.update(payload);
    Ok(mac)
}

/// Writer framing a byte stream into HMAC-authenticated blocks.
pub struct HmacBlockWriter<W: Write> {
    inner: W,
    hmac_key: Zeroizing<[u8; HMAC_KEY_LENGTH]>,
    block_size: usize,
    buffer: Vec<u8>,
    index: u64,
    closed: bool,
}

impl<W: Write> HmacBlockWriter<W> {
    /// Create a writer with the default block size.
    pub fn new(inner: W, hmac_key: &[u8; HMAC_KEY_LENGTH]) -> Self {
        Self::with_block_size(inner, hmac_key, DEFAULT_BLOCK_SIZE)
    }

    /// Create a writer emitting frames of `block_size` bytes (at least 1).
    pub fn with_block_size(inner: W, hmac_key: &[u8; HMAC_KEY_LENGTH], block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            inner,
            hmac_key: Zeroizing::new(*hmac_key),
            block_size,
            buffer: Vec::with_capacity(block_size.min(DEFAULT_BLOCK_SIZE)),
            index: 0,
            closed: false,
        }
    }

    fn write_frame(&mut self, payload_len: usize) -> Result<()> {
        let payload = &self.buffer[..payload_len];
        let tag = frame_mac(&self.hmac_key, self.index, payload)?.finalize().into_bytes();

        self.inner.write_all(&tag)?;
        self.inner.write_all(&(payload_len as u32).to_le_bytes())?;
        self.inner.write_all(payload)?;

        self.buffer.drain(..payload_len);
        self.index += 1;
        Ok(())
    }

    /// Flush the remaining bytes and append the terminal frame.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.buffer.is_empty() {
            self.write_frame(self.buffer.len())?;
        }
        self.write_frame(0)?;
        self.inner.flush()?;
        self.closed = true;
        tracing::debug!(blocks = self.index, "Closed HMAC block stream");
        Ok(())
    }

    /// Close the stream and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HmacBlockWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(Error::InvalidInput("Write after close".to_string()).into_io());
        }

        let mut input = buf;
        while !input.is_empty() {
            let take = (self.block_size - self.buffer.len()).min(input.len());
            self.buffer.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.buffer.len() >= self.block_size {
                self.write_frame(self.block_size).map_err(Error::into_io)?;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader verifying HMAC-authenticated blocks.
pub struct HmacBlockReader<R: Read> {
    inner: R,
    hmac_key: Zeroizing<[u8; HMAC_KEY_LENGTH]>,
    buffer: Vec<u8>,
    position: usize,
    index: u64,
    eof: bool,
    failed: bool,
}

impl<R: Read> HmacBlockReader<R> {
    /// Wrap an authenticated stream.
    pub fn new(inner: R, hmac_key: &[u8; HMAC_KEY_LENGTH]) -> Self {
        Self {
            inner,
            hmac_key: Zeroizing::new(*hmac_key),
            buffer: Vec::new(),
            position: 0,
            index: 0,
            eof: false,
            failed: false,
        }
    }

    fn read_block(&mut self) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        read_exact_or_truncated(&mut self.inner, &mut header, self.index)?;
        let stored_tag = &header[..MAC_LENGTH];
        let length = u32::from_le_bytes([
            header[MAC_LENGTH],
            header[MAC_LENGTH + 1],
            header[MAC_LENGTH + 2],
            header[MAC_LENGTH + 3],
        ]) as usize;

        self.buffer.clear();
        self.position = 0;
        let read = (&mut self.inner).take(length as u64).read_to_end(&mut self.buffer)?;
        if read != length {
            return Err(Error::IntegrityViolation(format!("Block {} is truncated", self.index)));
        }

        if frame_mac(&self.hmac_key, self.index, &self.buffer)?
            .verify_slice(stored_tag)
            .is_err()
        {
            self.buffer.clear();
            return Err(Error::IntegrityViolation(format!("Block {} MAC mismatch", self.index)));
        }

        self.index += 1;
        if length == 0 {
            self.eof = true;
            tracing::debug!(blocks = self.index, "Reached end of HMAC block stream");
        }
        Ok(())
    }
}

impl<R: Read> Read for HmacBlockReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.failed {
            return Err(Error::IntegrityViolation("Stream already failed verification".to_string()).into_io());
        }

        let mut written = 0;
        while written < buf.len() {
            if self.position >= self.buffer.len() {
                if self.eof {
                    break;
                }
                if let Err(e) = self.read_block() {
                    self.failed = true;
                    return Err(e.into_io());
                }
                continue;
            }
            let available = &self.buffer[self.position..];
            let n = available.len().min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&available[..n]);
            self.position += n;
            written += n;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; HMAC_KEY_LENGTH] = [0x5A; HMAC_KEY_LENGTH];

    fn frame(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut writer = HmacBlockWriter::with_block_size(Vec::new(), &KEY, block_size);
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    fn unframe(framed: &[u8], key: &[u8; HMAC_KEY_LENGTH]) -> Result<Vec<u8>> {
        let mut reader = HmacBlockReader::new(framed, key);
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_roundtrip_with_partial_block() {
        let data: Vec<u8> = (0..1500u32).map(|i| (i % 256) as u8).collect();
        let framed = frame(&data, 1024);
        assert_eq!(framed.len(), 3 * FRAME_HEADER_LENGTH + 1500);
        assert_eq!(unframe(&framed, &KEY).unwrap(), data);
    }

    #[test]
    fn test_terminal_frame_is_authenticated() {
        let framed = frame(b"", 64);
        assert_eq!(framed.len(), FRAME_HEADER_LENGTH);
        assert_ne!(&framed[..MAC_LENGTH], &[0u8; MAC_LENGTH][..]);
        assert!(unframe(&framed, &KEY).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_detected() {
        let framed = frame(b"payload", 64);
        let other = [0x11u8; HMAC_KEY_LENGTH];
        assert!(unframe(&framed, &other).unwrap_err().is_integrity());
    }

    #[test]
    fn test_tampering_detected() {
        let framed = frame(&[9u8; 200], 64);
        for position in [0, MAC_LENGTH, FRAME_HEADER_LENGTH + 5, framed.len() - 1] {
            let mut tampered = framed.clone();
            tampered[position] ^= 0x04;
            assert!(unframe(&tampered, &KEY).is_err(), "position {}", position);
        }
    }

    #[test]
    fn test_dropped_terminal_frame_detected() {
        let framed = frame(&[9u8; 10], 64);
        let cut = &framed[..framed.len() - FRAME_HEADER_LENGTH];
        assert!(unframe(cut, &KEY).unwrap_err().is_integrity());
    }

    #[test]
    fn test_header_mac() {
        let header = b"header bytes";
        let mac = header_mac(&KEY, header).unwrap();
        assert!(verify_header_mac(&KEY, header, &mac).unwrap());
        assert!(!verify_header_mac(&KEY, b"header bytez", &mac).unwrap());
        assert!(!verify_header_mac(&[0u8; 64], header, &mac).unwrap());
    }

    #[test]
    fn test_block_keys_differ_by_index() {
        assert_ne!(*block_key(&KEY, 0), *block_key(&KEY, 1));
        assert_ne!(*block_key(&KEY, 0), *block_key(&KEY, HEADER_INDEX));
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut writer = HmacBlockWriter::new(Vec::new(), &KEY);
        writer.close().unwrap();
        assert!(writer.write(b"late").is_err());
    }
}
