//! Streaming adapters for payload ciphers.
//!
//! [`CipherReader`] runs a [`Cipher`] over everything read from an inner
//! reader; [`CipherWriter`] runs it over everything written before passing
//! the output on. Both are byte-stream abstractions that accept any read or
//! write size.

use std::io::{self, Read, Write};

use crate::cipher::Cipher;
use vaultcodec_common::{Error, Result};

/// Size of reads issued to the inner reader.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reader applying a cipher to the bytes of an inner reader.
pub struct CipherReader<R> {
    inner: R,
    cipher: Cipher,
    buffer: Vec<u8>,
    position: usize,
    scratch: Vec<u8>,
    eof: bool,
}

impl<R: Read> CipherReader<R> {
    /// Wrap `inner` with an initialized cipher.
    pub fn new(inner: R, cipher: Cipher) -> Self {
        Self {
            inner,
            cipher,
            buffer: Vec::new(),
            position: 0,
            scratch: vec![0u8; READ_CHUNK_SIZE],
            eof: false,
        }
    }

    /// Consume the adapter, returning the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self) -> io::Result<()> {
        while self.position >= self.buffer.len() && !self.eof {
            let n = self.inner.read(&mut self.scratch)?;
            let output = if n == 0 {
                self.eof = true;
                self.cipher.finish()
            } else {
                self.cipher.update(&self.scratch[..n])
            };
            self.buffer = output.map_err(Error::into_io)?;
            self.position = 0;
        }
        Ok(())
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.fill()?;
        let available = &self.buffer[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

/// Writer applying a cipher before forwarding to an inner writer.
pub struct CipherWriter<W: Write> {
    inner: W,
    cipher: Cipher,
}

impl<W: Write> CipherWriter<W> {
    /// Wrap `inner` with an initialized cipher.
    pub fn new(inner: W, cipher: Cipher) -> Self {
        Self { inner, cipher }
    }

    /// Flush the final cipher block and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let tail = self.cipher.finish()?;
        self.inner.write_all(&tail)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let output = self.cipher.update(buf).map_err(Error::into_io)?;
        self.inner.write_all(&output)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
