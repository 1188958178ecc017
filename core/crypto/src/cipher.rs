//! Payload cipher engines.
//!
//! An engine is selected by its 16-byte [`AlgorithmId`] and produces a
//! single-use [`Cipher`] for one message:
//! - AES-256 and Twofish-256 run in CBC mode with PKCS#7 padding and a
//!   16-byte IV
//! - ChaCha20 (RFC 7539) is a keystream cipher with a 12-byte nonce and no
//!   padding
//!
//! Both CBC backends run on the same `aes` and `twofish` crates, which pick
//! hardware instructions at runtime on their own. [`Backend::Native`] hands
//! whole runs of blocks to the primitive in one call; [`Backend::Portable`]
//! feeds it one block at a time. Neither is a separate software reference
//! implementation.
//!
//! # Security
//! A (key, IV) pair must never be reused across independent messages.

use aes::Aes256;
use cipher::block_padding::{Pkcs7, RawPadding};
use cipher::consts::U16;
use cipher::generic_array::GenericArray;
use cipher::{
    BlockCipher, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit,
    StreamCipher,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use twofish::Twofish;

use crate::keys::KEY_LENGTH;
use crate::policy::{Accelerated, Backend, SelectionPolicy};
use vaultcodec_common::{AlgorithmId, Error, Result};

/// AES-256-CBC.
pub const AES_ID: AlgorithmId = AlgorithmId::from_u128(0x31c1f2e6_bf71_4350_be58_05216afc5aff);

/// Twofish-256-CBC.
pub const TWOFISH_ID: AlgorithmId = AlgorithmId::from_u128(0xad68f29f_576f_4bb9_a36a_d47af965346c);

/// ChaCha20 with a 96-bit nonce.
pub const CHACHA20_ID: AlgorithmId = AlgorithmId::from_u128(0xd6038a2b_8b6f_4cb5_a524_339a31dbb59a);

/// Block size of the CBC engines.
pub const BLOCK_SIZE: usize = 16;

type Block = GenericArray<u8, U16>;

/// Direction of an initialized cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

/// Registered payload cipher engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherEngine {
    Aes,
    Twofish,
    ChaCha20,
}

impl CipherEngine {
    /// All registered engines.
    pub const ALL: [CipherEngine; 3] = [CipherEngine::Aes, CipherEngine::Twofish, CipherEngine::ChaCha20];

    /// Look up the engine registered for `id`.
    ///
    /// # Errors
    /// - `UnsupportedAlgorithm` if no engine uses this identifier
    pub fn resolve(id: &AlgorithmId) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|engine| engine.id() == *id)
            .ok_or(Error::UnsupportedAlgorithm(*id))
    }

    /// The engine's identifier.
    pub fn id(&self) -> AlgorithmId {
        match self {
            CipherEngine::Aes => AES_ID,
            CipherEngine::Twofish => TWOFISH_ID,
            CipherEngine::ChaCha20 => CHACHA20_ID,
        }
    }

    /// Required IV length in bytes.
    pub fn iv_length(&self) -> usize {
        match self {
            CipherEngine::Aes | CipherEngine::Twofish => 16,
            CipherEngine::ChaCha20 => 12,
        }
    }

    /// Required key length in bytes.
    pub fn key_length(&self) -> usize {
        KEY_LENGTH
    }

    /// Human readable name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherEngine::Aes => "AES-256",
            CipherEngine::Twofish => "Twofish",
            CipherEngine::ChaCha20 => "ChaCha20",
        }
    }

    fn accelerated(&self) -> Accelerated {
        match self {
            CipherEngine::Aes => Accelerated::AesCipher,
            CipherEngine::Twofish => Accelerated::TwofishCipher,
            CipherEngine::ChaCha20 => Accelerated::ChaCha20Cipher,
        }
    }

    /// Initialize a cipher using the process-wide selection policy.
    pub fn init(&self, mode: CipherMode, key: &[u8], iv: &[u8]) -> Result<Cipher> {
        self.init_with(SelectionPolicy::shared(), mode, key, iv)
    }

    /// Initialize a cipher for one message.
    ///
    /// # Errors
    /// - Returns error if key or IV length is wrong
    pub fn init_with(
        &self,
        policy: &SelectionPolicy,
        mode: CipherMode,
        key: &[u8],
        iv: &[u8],
    ) -> Result<Cipher> {
        if key.len() != self.key_length() {
            return Err(Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                self.key_length(),
                key.len()
            )));
        }
        if iv.len() != self.iv_length() {
            return Err(Error::Crypto(format!(
                "Invalid IV length for {}: expected {}, got {}",
                self.name(),
                self.iv_length(),
                iv.len()
            )));
        }

        let backend = policy.backend_for(self.accelerated());
        tracing::debug!(engine = self.name(), ?mode, ?backend, "Initializing cipher");

        let inner = match self {
            CipherEngine::Aes => CipherInner::Aes(CbcCipher::new(mode, key, iv, backend)?),
            CipherEngine::Twofish => CipherInner::Twofish(CbcCipher::new(mode, key, iv, backend)?),
            CipherEngine::ChaCha20 => {
                let stream = chacha20::ChaCha20::new_from_slices(key, iv)
                    .map_err(|e| Error::Crypto(format!("ChaCha20 init failed: {}", e)))?;
                CipherInner::ChaCha20(stream)
            }
        };

        Ok(Cipher {
            engine: *self,
            mode,
            inner,
            finished: false,
        })
    }
}

impl fmt::Display for CipherEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An initialized, single-use cipher.
pub struct Cipher {
    engine: CipherEngine,
    mode: CipherMode,
    inner: CipherInner,
    finished: bool,
}

enum CipherInner {
    Aes(CbcCipher<Aes256>),
    Twofish(CbcCipher<Twofish>),
    ChaCha20(chacha20::ChaCha20),
}

impl Cipher {
    /// Engine that produced this cipher.
    pub fn engine(&self) -> CipherEngine {
        self.engine
    }

    /// Direction of this cipher.
    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Process more input, returning whatever output is ready.
    ///
    /// CBC ciphers buffer partial blocks, and when decrypting also the last
    /// full block, until [`Cipher::finish`].
    pub fn update(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::Crypto("Cipher already finished".to_string()));
        }
        Ok(match &mut self.inner {
            CipherInner::Aes(c) => c.update(input),
            CipherInner::Twofish(c) => c.update(input),
            CipherInner::ChaCha20(c) => {
                let mut out = input.to_vec();
                c.apply_keystream(&mut out);
                out
            }
        })
    }

    /// Flush the final block.
    ///
    /// # Errors
    /// - `Crypto` if the ciphertext length is not a whole number of blocks
    /// - `InvalidCredentials` if the padding is malformed, which in practice
    ///   means the key was wrong
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        if self.finished {
            return Err(Error::Crypto("Cipher already finished".to_string()));
        }
        self.finished = true;
        match &mut self.inner {
            CipherInner::Aes(c) => c.finish(),
            CipherInner::Twofish(c) => c.finish(),
            CipherInner::ChaCha20(_) => Ok(Vec::new()),
        }
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("engine", &self.engine)
            .field("mode", &self.mode)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Block ciphers usable in CBC mode here.
trait CbcBlockCipher:
    BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit + BlockSizeUser<BlockSize = U16>
{
}

impl<T> CbcBlockCipher for T where
    T: BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit + BlockSizeUser<BlockSize = U16>
{
}

enum CbcState<C: CbcBlockCipher> {
    Encrypt(cbc::Encryptor<C>),
    Decrypt(cbc::Decryptor<C>),
}

struct CbcCipher<C: CbcBlockCipher> {
    state: CbcState<C>,
    backend: Backend,
    pending: Vec<u8>,
}

impl<C: CbcBlockCipher> CbcCipher<C> {
    fn new(mode: CipherMode, key: &[u8], iv: &[u8], backend: Backend) -> Result<Self> {
        let invalid = |e: cipher::InvalidLength| Error::Crypto(format!("CBC init failed: {}", e));
        let state = match mode {
            CipherMode::Encrypt => {
                CbcState::Encrypt(cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(invalid)?)
            }
            CipherMode::Decrypt => {
                CbcState::Decrypt(cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(invalid)?)
            }
        };
        Ok(Self {
            state,
            backend,
            pending: Vec::new(),
        })
    }

    fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);
        let ready = match self.state {
            CbcState::Encrypt(_) => self.pending.len() / BLOCK_SIZE * BLOCK_SIZE,
            // The last block may carry padding; keep it until finish.
            CbcState::Decrypt(_) => self.pending.len().saturating_sub(1) / BLOCK_SIZE * BLOCK_SIZE,
        };
        let mut chunk: Vec<u8> = self.pending.drain(..ready).collect();
        self.process(&mut chunk);
        chunk
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let mut last = [0u8; BLOCK_SIZE];
        match self.state {
            CbcState::Encrypt(_) => {
                let pos = self.pending.len();
                last[..pos].copy_from_slice(&self.pending);
                Pkcs7::raw_pad(&mut last, pos);
                self.pending.clear();
                self.process(&mut last);
                Ok(last.to_vec())
            }
            CbcState::Decrypt(_) => {
                if self.pending.len() != BLOCK_SIZE {
                    return Err(Error::Crypto(format!(
                        "Ciphertext is not a whole number of blocks ({} trailing bytes)",
                        self.pending.len() % BLOCK_SIZE
                    )));
                }
                last.copy_from_slice(&self.pending);
                self.pending.clear();
                self.process(&mut last);
                let plain = Pkcs7::raw_unpad(&last).map_err(|_| Error::InvalidCredentials)?;
                Ok(plain.to_vec())
            }
        }
    }

    fn process(&mut self, data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
        match self.backend {
            Backend::Native => {
                let mut blocks: Vec<Block> =
                    data.chunks_exact(BLOCK_SIZE).map(Block::clone_from_slice).collect();
                match &mut self.state {
                    CbcState::Encrypt(c) => c.encrypt_blocks_mut(&mut blocks),
                    CbcState::Decrypt(c) => c.decrypt_blocks_mut(&mut blocks),
                }
                for (dst, block) in data.chunks_exact_mut(BLOCK_SIZE).zip(blocks.iter()) {
                    dst.copy_from_slice(block);
                }
            }
            Backend::Portable => {
                for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
                    let block = Block::from_mut_slice(chunk);
                    match &mut self.state {
                        CbcState::Encrypt(c) => c.encrypt_block_mut(block),
                        CbcState::Decrypt(c) => c.decrypt_block_mut(block),
                    }
                }
            }
        }
    }
}
