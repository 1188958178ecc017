//! Hash-verified block framing.
//!
//! The body is split into frames, each carrying the SHA-256 of its plaintext
//! payload, so corruption or truncation is detected before any damaged byte
//! reaches the consumer.
//!
//! # Format
//! - Frame: index (u32 LE) + SHA-256 of payload (32) + length (u32 LE) + payload
//! - Indices start at 0 and increase by one
//! - Sentinel: next index + 32 zero bytes + length 0
//!
//! Every frame except the last content frame carries exactly `block_size`
//! bytes, so the output is a pure function of the input and the block size.

use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use subtle::ConstantTimeEq;

use vaultcodec_common::{Error, Result};

/// Default payload size per frame (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Length of the per-frame digest.
pub const HASH_LENGTH: usize = 32;

const FRAME_HEADER_LENGTH: usize = 4 + HASH_LENGTH + 4;

/// Writer framing a byte stream into hash-verified blocks.
///
/// Call [`HashedBlockWriter::close`] or [`HashedBlockWriter::finish`] to emit
/// the final frame and the sentinel; a writer dropped without closing leaves
/// a stream the reader rejects as truncated.
pub struct HashedBlockWriter<W: Write> {
    inner: W,
    block_size: usize,
    buffer: Vec<u8>,
    index: u32,
    closed: bool,
}

impl<W: Write> HashedBlockWriter<W> {
    /// Create a writer with the default block size.
    pub fn new(inner: W) -> Self {
        Self::with_block_size(inner, DEFAULT_BLOCK_SIZE)
    }

    /// Create a writer emitting frames of `block_size` bytes.
    ///
    /// A block size of 0 is treated as 1.
    pub fn with_block_size(inner: W, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            inner,
            block_size,
            buffer: Vec::with_capacity(block_size.min(DEFAULT_BLOCK_SIZE)),
            index: 0,
            closed: false,
        }
    }

    /// Configured frame size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the sentinel has been written.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn write_frame(&mut self, payload_len: usize) -> io::Result<()> {
        let payload = &self.buffer[..payload_len];
        let hash: [u8; HASH_LENGTH] = Sha256::digest(payload).into();
        let length = u32::try_from(payload_len)
            .map_err(|_| Error::InvalidInput("Block exceeds 4 GiB".to_string()).into_io())?;

        let mut header = [0u8; FRAME_HEADER_LENGTH];
        header[..4].copy_from_slice(&self.index.to_le_bytes());
        header[4..4 + HASH_LENGTH].copy_from_slice(&hash);
        header[4 + HASH_LENGTH..].copy_from_slice(&length.to_le_bytes());
        self.inner.write_all(&header)?;
        self.inner.write_all(payload)?;

        self.buffer.drain(..payload_len);
        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::InvalidInput("Too many blocks".to_string()).into_io())?;
        Ok(())
    }

    /// Flush the remaining bytes as a final frame and append the sentinel.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.buffer.is_empty() {
            self.write_frame(self.buffer.len())?;
        }

        let mut sentinel = [0u8; FRAME_HEADER_LENGTH];
        sentinel[..4].copy_from_slice(&self.index.to_le_bytes());
        self.inner.write_all(&sentinel)?;
        self.inner.flush()?;
        self.closed = true;
        tracing::debug!(blocks = self.index, "Closed hashed block stream");
        Ok(())
    }

    /// Close the stream and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for HashedBlockWriter<W> {
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
                self.write_frame(self.block_size)?;
            }
        }
        Ok(buf.len())
    }

    /// Flushes the inner writer only; partial frames stay buffered.
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader reconstructing and verifying a hashed block stream.
pub struct HashedBlockReader<R: Read> {
    inner: R,
    buffer: Vec<u8>,
    position: usize,
    index: u32,
    eof: bool,
    failed: bool,
}

impl<R: Read> HashedBlockReader<R> {
    /// Wrap a framed stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            position: 0,
            index: 0,
            eof: false,
            failed: false,
        }
    }

    /// Whether the sentinel has been reached.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Consume the reader, returning the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_block(&mut self) -> Result<()> {
        let mut header = [0u8; FRAME_HEADER_LENGTH];
        read_exact_or_truncated(&mut self.inner, &mut header, self.index)?;

        let index = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if index != self.index {
            return Err(Error::IntegrityViolation(format!(
                "Block index out of sequence: expected {}, found {}",
                self.index, index
            )));
        }
        let stored_hash = &header[4..4 + HASH_LENGTH];
        let length = u32::from_le_bytes([
            header[4 + HASH_LENGTH],
            header[5 + HASH_LENGTH],
            header[6 + HASH_LENGTH],
            header[7 + HASH_LENGTH],
        ]) as usize;

        if length == 0 {
            if stored_hash.iter().any(|b| *b != 0) {
                return Err(Error::IntegrityViolation(format!(
                    "Terminal block {} has a non-zero hash",
                    index
                )));
            }
            self.eof = true;
            self.buffer.clear();
            self.position = 0;
            tracing::debug!(blocks = index, "Reached end of hashed block stream");
            return Ok(());
        }

        self.buffer.clear();
        self.position = 0;
        let read = (&mut self.inner).take(length as u64).read_to_end(&mut self.buffer)?;
        if read != length {
            return Err(Error::IntegrityViolation(format!("Block {} is truncated", index)));
        }

        let hash = Sha256::digest(&self.buffer);
        if !bool::from(hash.as_slice().ct_eq(stored_hash)) {
            self.buffer.clear();
            return Err(Error::IntegrityViolation(format!("Block {} hash mismatch", index)));
        }

        self.index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::IntegrityViolation("Too many blocks".to_string()))?;
        Ok(())
    }
}

impl<R: Read> Read for HashedBlockReader<R> {
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

/// `read_exact` that reports a missing frame as an integrity failure.
pub(crate) fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8], index: impl std::fmt::Display) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::IntegrityViolation(format!("Stream truncated before block {}", index))
        } else {
            Error::from(e)
        }
    })
}
