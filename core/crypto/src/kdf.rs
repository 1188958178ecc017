//! Key derivation functions.
//!
//! Two families stretch a [`CompositeKey`] into a [`DerivedKey`]:
//! - AES-KDF: the composite key is encrypted with AES-256 keyed by the seed,
//!   each 16-byte half independently, for a caller-chosen number of rounds,
//!   then hashed with SHA-256
//! - Argon2d / Argon2id: memory-hard derivation with the composite key as
//!   password and the seed as salt
//!
//! Native and portable backends must produce byte-identical output.

use aes::Aes256;
use argon2::{Algorithm, Argon2, AssociatedData, Params, ParamsBuilder, Version};
use cipher::consts::U16;
use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use tracing::{debug, info};
use zeroize::{Zeroize, Zeroizing};

use crate::keys::{sha256, CompositeKey, DerivedKey, KEY_LENGTH};
use crate::params::{
    KdfParameters, VariantValue, PARAM_ASSOC_DATA, PARAM_ITERATIONS, PARAM_MEMORY,
    PARAM_PARALLELISM, PARAM_ROUNDS, PARAM_SECRET_KEY, PARAM_VERSION, SEED_LENGTH,
};
use crate::policy::{Accelerated, Backend, SelectionPolicy};
use vaultcodec_common::{Error, KdfId, Result};

/// AES-KDF.
pub const AES_KDF_ID: KdfId = KdfId::from_u128(0xc9d9f39a_628a_4460_bf74_0d08c18a4fea);

/// Argon2d.
pub const ARGON2D_ID: KdfId = KdfId::from_u128(0xef636ddf_8c29_444b_91f7_a9a403e30a0c);

/// Argon2id.
pub const ARGON2ID_ID: KdfId = KdfId::from_u128(0x9e298b19_56db_4773_b23d_fc3ec6f0a1e6);

/// Default AES-KDF rounds.
pub const DEFAULT_AES_ROUNDS: u64 = 60_000;

/// Default Argon2 memory in bytes (16 MiB).
pub const DEFAULT_ARGON2_MEMORY: u64 = 16 * 1024 * 1024;

/// Default Argon2 iterations.
pub const DEFAULT_ARGON2_ITERATIONS: u64 = 3;

/// Default Argon2 lanes.
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 4;

/// Smallest accepted Argon2 memory in bytes.
pub const MIN_ARGON2_MEMORY: u64 = 8 * 1024;

/// Largest accepted Argon2 memory in bytes.
pub const MAX_ARGON2_MEMORY: u64 = u32::MAX as u64;

/// Largest accepted Argon2 parallelism.
pub const MAX_ARGON2_PARALLELISM: u32 = (1 << 24) - 1;

const ARGON2_VERSION_10: u32 = 0x10;
const ARGON2_VERSION_13: u32 = 0x13;

/// Blocks the native Argon2 arena keeps between derivations (16 MiB).
const ARENA_RETAIN_BLOCKS: usize = 16 * 1024;

type Block = GenericArray<u8, U16>;

/// Argon2 flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argon2Variant {
    Argon2d,
    Argon2id,
}

impl Argon2Variant {
    /// Identifier of this variant.
    pub fn id(&self) -> KdfId {
        match self {
            Argon2Variant::Argon2d => ARGON2D_ID,
            Argon2Variant::Argon2id => ARGON2ID_ID,
        }
    }

    fn algorithm(&self) -> Algorithm {
        match self {
            Argon2Variant::Argon2d => Algorithm::Argon2d,
            Argon2Variant::Argon2id => Algorithm::Argon2id,
        }
    }
}

impl KdfParameters {
    /// AES-KDF parameters with a fresh random seed.
    pub fn aes(rounds: u64) -> Self {
        let mut params = KdfParameters::new(AES_KDF_ID);
        params
            .dictionary_mut()
            .set(PARAM_ROUNDS, VariantValue::UInt64(rounds));
        params.randomize_seed();
        params
    }

    /// Argon2 parameters (version 1.3) with a fresh random salt.
    pub fn argon2(variant: Argon2Variant, memory_bytes: u64, iterations: u64, parallelism: u32) -> Self {
        let mut params = KdfParameters::new(variant.id());
        let dict = params.dictionary_mut();
        dict.set(PARAM_PARALLELISM, VariantValue::UInt32(parallelism));
        dict.set(PARAM_MEMORY, VariantValue::UInt64(memory_bytes));
        dict.set(PARAM_ITERATIONS, VariantValue::UInt64(iterations));
        dict.set(PARAM_VERSION, VariantValue::UInt32(ARGON2_VERSION_13));
        params.randomize_seed();
        params
    }
}

/// A resolved key derivation function with validated parameters.
///
/// The seed is not part of the transformer; it is passed to
/// [`KeyTransformer::transform`].
#[derive(Clone)]
pub enum KeyTransformer {
    Aes(AesKdf),
    Argon2(Argon2Kdf),
}

/// AES-KDF settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesKdf {
    pub rounds: u64,
}

/// Argon2 settings.
#[derive(Clone)]
pub struct Argon2Kdf {
    pub variant: Argon2Variant,
    /// Memory in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    version: Version,
    secret: Option<Zeroizing<Vec<u8>>>,
    associated_data: Option<Vec<u8>>,
}

impl KeyTransformer {
    /// Select the function named by the parameters' `$UUID`.
    ///
    /// # Errors
    /// - `UnknownKdf` if the identifier is not registered
    /// - `KeyDerivation` if required parameters are missing or out of range
    pub fn resolve(params: &KdfParameters) -> Result<Self> {
        let id = params.kdf_id()?;
        let dict = params.dictionary();

        if id == AES_KDF_ID {
            let rounds = dict
                .get_u64(PARAM_ROUNDS)
                .ok_or_else(|| Error::KeyDerivation("AES-KDF rounds missing".to_string()))?;
            if rounds == 0 {
                return Err(Error::KeyDerivation("AES-KDF rounds must be positive".to_string()));
            }
            return Ok(KeyTransformer::Aes(AesKdf { rounds }));
        }

        let variant = if id == ARGON2D_ID {
            Argon2Variant::Argon2d
        } else if id == ARGON2ID_ID {
            Argon2Variant::Argon2id
        } else {
            return Err(Error::UnknownKdf(id));
        };

        let parallelism = dict
            .get_u32(PARAM_PARALLELISM)
            .ok_or_else(|| Error::KeyDerivation("Argon2 parallelism missing".to_string()))?;
        if parallelism == 0 || parallelism > MAX_ARGON2_PARALLELISM {
            return Err(Error::KeyDerivation(format!(
                "Argon2 parallelism out of range: {}",
                parallelism
            )));
        }

        let memory = dict
            .get_u64(PARAM_MEMORY)
            .ok_or_else(|| Error::KeyDerivation("Argon2 memory missing".to_string()))?;
        if memory < MIN_ARGON2_MEMORY {
            return Err(Error::KeyDerivation(format!("Argon2 memory too small: {} bytes", memory)));
        }
        if memory > MAX_ARGON2_MEMORY {
            return Err(Error::KeyDerivation(format!("Argon2 memory too large: {} bytes", memory)));
        }
        let memory_kib = u32::try_from(memory / 1024)
            .map_err(|_| Error::KeyDerivation(format!("Argon2 memory too large: {} bytes", memory)))?;

        let iterations = dict
            .get_u64(PARAM_ITERATIONS)
            .ok_or_else(|| Error::KeyDerivation("Argon2 iterations missing".to_string()))?;
        let iterations = u32::try_from(iterations)
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| Error::KeyDerivation(format!("Argon2 iterations out of range: {}", iterations)))?;

        let version = match dict.get_u32(PARAM_VERSION) {
            Some(ARGON2_VERSION_10) => Version::V0x10,
            Some(ARGON2_VERSION_13) => Version::V0x13,
            Some(other) => {
                return Err(Error::KeyDerivation(format!("Unsupported Argon2 version: {:#x}", other)));
            }
            None => Version::V0x13,
        };

        Ok(KeyTransformer::Argon2(Argon2Kdf {
            variant,
            memory_kib,
            iterations,
            parallelism,
            version,
            secret: dict
                .get_bytes(PARAM_SECRET_KEY)
                .filter(|s| !s.is_empty())
                .map(|s| Zeroizing::new(s.to_vec())),
            associated_data: dict
                .get_bytes(PARAM_ASSOC_DATA)
                .filter(|a| !a.is_empty())
                .map(<[u8]>::to_vec),
        }))
    }

    /// Identifier of the resolved function.
    pub fn id(&self) -> KdfId {
        match self {
            KeyTransformer::Aes(_) => AES_KDF_ID,
            KeyTransformer::Argon2(argon) => argon.variant.id(),
        }
    }

    /// Human readable name.
    pub fn name(&self) -> &'static str {
        match self {
            KeyTransformer::Aes(_) => "AES-KDF",
            KeyTransformer::Argon2(Argon2Kdf {
                variant: Argon2Variant::Argon2d,
                ..
            }) => "Argon2d",
            KeyTransformer::Argon2(_) => "Argon2id",
        }
    }

    fn accelerated(&self) -> Accelerated {
        match self {
            KeyTransformer::Aes(_) => Accelerated::AesKdf,
            KeyTransformer::Argon2(_) => Accelerated::Argon2,
        }
    }

    /// Derive a key using the process-wide selection policy.
    pub fn transform(&self, seed: &[u8], composite: &CompositeKey) -> Result<DerivedKey> {
        self.transform_with(SelectionPolicy::shared(), seed, composite)
    }

    /// Derive a key.
    ///
    /// # Preconditions
    /// - AES-KDF: `seed` is 32 bytes
    /// - Argon2: `seed` is at least 8 bytes
    ///
    /// # Postconditions
    /// - Output depends only on the parameters, `seed` and `composite`,
    ///   never on the backend
    ///
    /// # Errors
    /// - `KeyDerivation` if the primitive rejects the parameter combination
    ///
    /// # Security
    /// - Cost is proportional to the configured work factor
    /// - Intermediate buffers are zeroized
    pub fn transform_with(
        &self,
        policy: &SelectionPolicy,
        seed: &[u8],
        composite: &CompositeKey,
    ) -> Result<DerivedKey> {
        let backend = policy.backend_for(self.accelerated());
        match self {
            KeyTransformer::Aes(aes) => {
                info!(rounds = aes.rounds, ?backend, "Running AES-KDF");
                aes_transform(seed, composite.as_bytes(), aes.rounds, backend)
            }
            KeyTransformer::Argon2(argon) => {
                info!(
                    variant = ?argon.variant,
                    memory_kib = argon.memory_kib,
                    iterations = argon.iterations,
                    parallelism = argon.parallelism,
                    ?backend,
                    "Running Argon2"
                );
                argon.derive(seed, composite.as_bytes(), backend)
            }
        }
    }
}

impl fmt::Debug for KeyTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyTransformer::Aes(aes) => f.debug_tuple("Aes").field(aes).finish(),
            KeyTransformer::Argon2(argon) => f
                .debug_struct("Argon2")
                .field("variant", &argon.variant)
                .field("memory_kib", &argon.memory_kib)
                .field("iterations", &argon.iterations)
                .field("parallelism", &argon.parallelism)
                .field("secret", &argon.secret.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Resolve the parameters and derive a key with their stored seed.
pub fn derive_key(
    params: &KdfParameters,
    composite: &CompositeKey,
    policy: &SelectionPolicy,
) -> Result<DerivedKey> {
    KeyTransformer::resolve(params)?.transform_with(policy, params.seed(), composite)
}

fn aes_transform(seed: &[u8], key: &[u8; KEY_LENGTH], rounds: u64, backend: Backend) -> Result<DerivedKey> {
    if seed.len() != SEED_LENGTH {
        return Err(Error::KeyDerivation(format!(
            "AES-KDF seed must be {} bytes, got {}",
            SEED_LENGTH,
            seed.len()
        )));
    }
    let cipher = Aes256::new_from_slice(seed)
        .map_err(|e| Error::KeyDerivation(format!("AES-KDF init failed: {}", e)))?;

    let mut blocks = [Block::clone_from_slice(&key[..16]), Block::clone_from_slice(&key[16..])];
    match backend {
        Backend::Native => {
            for _ in 0..rounds {
                cipher.encrypt_blocks(&mut blocks);
            }
        }
        Backend::Portable => {
            for _ in 0..rounds {
                cipher.encrypt_block(&mut blocks[0]);
                cipher.encrypt_block(&mut blocks[1]);
            }
        }
    }

    let mut transformed = Zeroizing::new([0u8; KEY_LENGTH]);
    transformed[..16].copy_from_slice(&blocks[0]);
    transformed[16..].copy_from_slice(&blocks[1]);
    for block in blocks.iter_mut() {
        block.as_mut_slice().zeroize();
    }

    Ok(DerivedKey::from_bytes(sha256(&[transformed.as_slice()])))
}

thread_local! {
    static ARGON2_ARENA: RefCell<Vec<argon2::Block>> = const { RefCell::new(Vec::new()) };
}

impl Argon2Kdf {
    fn params(&self) -> Result<Params> {
        let mut builder = ParamsBuilder::new();
        builder
            .m_cost(self.memory_kib)
            .t_cost(self.iterations)
            .p_cost(self.parallelism)
            .output_len(KEY_LENGTH);
        if let Some(data) = &self.associated_data {
            let data = AssociatedData::new(data)
                .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 associated data: {}", e)))?;
            builder.data(data);
        }
        builder
            .build()
            .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))
    }

    fn derive(&self, salt: &[u8], password: &[u8], backend: Backend) -> Result<DerivedKey> {
        let params = self.params()?;
        let block_count = params.block_count();
        let algorithm = self.variant.algorithm();
        let argon2 = match &self.secret {
            Some(secret) => Argon2::new_with_secret(secret.as_slice(), algorithm, self.version, params)
                .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 secret: {}", e)))?,
            None => Argon2::new(algorithm, self.version, params),
        };

        let mut output = Zeroizing::new([0u8; KEY_LENGTH]);
        match backend {
            Backend::Native => ARGON2_ARENA.with(|arena| {
                let mut arena = arena.borrow_mut();
                if arena.len() < block_count {
                    debug!(blocks = block_count, "Growing Argon2 memory arena");
                    arena.resize(block_count, argon2::Block::default());
                } else if arena.len() > block_count.saturating_mul(2) {
                    arena.truncate(block_count);
                    arena.shrink_to_fit();
                }
                let result = argon2.hash_password_into_with_memory(
                    password,
                    salt,
                    output.as_mut_slice(),
                    &mut arena[..block_count],
                );
                arena[..block_count]
                    .iter_mut()
                    .for_each(|block| *block = argon2::Block::default());
                if arena.len() > ARENA_RETAIN_BLOCKS {
                    debug!(blocks = arena.len(), "Releasing Argon2 memory arena");
                    *arena = Vec::new();
                }
                result
            }),
            Backend::Portable => argon2.hash_password_into(password, salt, output.as_mut_slice()),
        }
        .map_err(|e| Error::KeyDerivation(format!("Argon2 failed: {}", e)))?;

        Ok(DerivedKey::from_output(output.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{VariantDictionary, PARAM_SEED};
    use crate::policy::FixedDetector;

    fn native() -> SelectionPolicy {
        SelectionPolicy::with_detector(Box::new(FixedDetector(true)))
    }

    fn portable() -> SelectionPolicy {
        SelectionPolicy::portable_only()
    }

    fn composite() -> CompositeKey {
        CompositeKey::from_password(b"correct horse battery staple").unwrap()
    }

    #[test]
    fn test_aes_kdf_matches_reference() {
        let seed = [7u8; 32];
        let key = composite();
        let rounds = 100;

        let cipher = Aes256::new_from_slice(&seed).unwrap();
        let mut expected = *key.as_bytes();
        for _ in 0..rounds {
            for half in expected.chunks_mut(16) {
                cipher.encrypt_block(Block::from_mut_slice(half));
            }
        }
        let expected = sha256(&[expected.as_slice()]);

        let transformer = KeyTransformer::Aes(AesKdf { rounds });
        let derived = transformer.transform_with(&portable(), &seed, &key).unwrap();
        assert_eq!(derived.as_bytes(), &expected);
    }

    #[test]
    fn test_aes_kdf_backends_identical() {
        let params = KdfParameters::aes(1_000);
        let key = composite();

        let a = derive_key(&params, &key, &native()).unwrap();
        let b = derive_key(&params, &key, &portable()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_aes_kdf_deterministic_and_seed_sensitive() {
        let key = composite();
        let transformer = KeyTransformer::Aes(AesKdf { rounds: 10 });

        let a = transformer.transform_with(&portable(), &[1u8; 32], &key).unwrap();
        let b = transformer.transform_with(&portable(), &[1u8; 32], &key).unwrap();
        let c = transformer.transform_with(&portable(), &[2u8; 32], &key).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_aes_kdf_bad_seed_length() {
        let transformer = KeyTransformer::Aes(AesKdf { rounds: 10 });
        let result = transformer.transform_with(&portable(), &[1u8; 16], &composite());
        assert!(matches!(result, Err(Error::KeyDerivation(_))));
    }

    fn rfc9106(variant: Argon2Variant) -> (KdfParameters, CompositeKey) {
        let mut params = KdfParameters::argon2(variant, 32 * 1024, 3, 4);
        params.set_seed(vec![0x02; 16]);
        let dict = params.dictionary_mut();
        dict.set(PARAM_SECRET_KEY, VariantValue::Bytes(vec![0x03; 8]));
        dict.set(PARAM_ASSOC_DATA, VariantValue::Bytes(vec![0x04; 12]));
        (params, CompositeKey::from_bytes([0x01; 32]))
    }

    #[test]
    fn test_argon2d_rfc9106_vector() {
        let (params, key) = rfc9106(Argon2Variant::Argon2d);
        let expected =
            hex::decode("512b391b6f1162975371d30919734294f868e3be3984f3c1a13a4db9fabe4acb").unwrap();

        for policy in [native(), portable()] {
            let derived = derive_key(&params, &key, &policy).unwrap();
            assert_eq!(derived.as_bytes().as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn test_argon2id_rfc9106_vector() {
        let (params, key) = rfc9106(Argon2Variant::Argon2id);
        let expected =
            hex::decode("0d640df58d78766c08c037a34a8b53c9d01ef0452d75b65eb52520e96b01e659").unwrap();

        for policy in [native(), portable()] {
            let derived = derive_key(&params, &key, &policy).unwrap();
            assert_eq!(derived.as_bytes().as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn test_argon2_backends_identical_across_calls() {
        let params = KdfParameters::argon2(Argon2Variant::Argon2d, 1024 * 1024, 1, 2);
        let key = composite();
        let policy = native();

        let first = derive_key(&params, &key, &policy).unwrap();
        // Arena is reused on the second call
        let second = derive_key(&params, &key, &policy).unwrap();
        let reference = derive_key(&params, &key, &portable()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes(), reference.as_bytes());
    }

    #[test]
    fn test_argon2_version_10() {
        let mut params = KdfParameters::argon2(Argon2Variant::Argon2d, 64 * 1024, 1, 1);
        let key = composite();
        let v13 = derive_key(&params, &key, &portable()).unwrap();
        params
            .dictionary_mut()
            .set(PARAM_VERSION, VariantValue::UInt32(ARGON2_VERSION_10));
        let v10 = derive_key(&params, &key, &portable()).unwrap();
        assert_ne!(v13.as_bytes(), v10.as_bytes());
    }

    #[test]
    fn test_unknown_kdf_rejected() {
        let id = KdfId::from_bytes([0xEE; 16]);
        let params = KdfParameters::new(id);
        match KeyTransformer::resolve(&params) {
            Err(Error::UnknownKdf(rejected)) => assert_eq!(rejected, id),
            other => panic!("expected UnknownKdf, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut zero_rounds = KdfParameters::aes(1);
        zero_rounds
            .dictionary_mut()
            .set(PARAM_ROUNDS, VariantValue::UInt64(0));
        assert!(matches!(KeyTransformer::resolve(&zero_rounds), Err(Error::KeyDerivation(_))));

        let tiny_memory = KdfParameters::argon2(Argon2Variant::Argon2id, 1024, 1, 1);
        assert!(matches!(KeyTransformer::resolve(&tiny_memory), Err(Error::KeyDerivation(_))));

        let no_lanes = KdfParameters::argon2(Argon2Variant::Argon2id, 64 * 1024, 1, 0);
        assert!(matches!(KeyTransformer::resolve(&no_lanes), Err(Error::KeyDerivation(_))));

        let no_iterations = KdfParameters::argon2(Argon2Variant::Argon2id, 64 * 1024, 0, 1);
        assert!(matches!(KeyTransformer::resolve(&no_iterations), Err(Error::KeyDerivation(_))));

        let mut bad_version = KdfParameters::argon2(Argon2Variant::Argon2id, 64 * 1024, 1, 1);
        bad_version
            .dictionary_mut()
            .set(PARAM_VERSION, VariantValue::UInt32(0x11));
        assert!(matches!(KeyTransformer::resolve(&bad_version), Err(Error::KeyDerivation(_))));

        let huge_memory = KdfParameters::argon2(Argon2Variant::Argon2d, 8 * 1024 * 1024 * 1024, 1, 1);
        assert!(matches!(KeyTransformer::resolve(&huge_memory), Err(Error::KeyDerivation(_))));
        assert!(matches!(
            derive_key(&huge_memory, &composite(), &native()),
            Err(Error::KeyDerivation(_))
        ));

        let largest = KdfParameters::argon2(Argon2Variant::Argon2d, MAX_ARGON2_MEMORY, 1, 1);
        assert!(KeyTransformer::resolve(&largest).is_ok());
    }

    #[test]
    fn test_argon2_version_defaults_to_13() {
        let explicit = KdfParameters::argon2(Argon2Variant::Argon2id, 64 * 1024, 1, 1);
        let mut implicit = explicit.clone();
        implicit.dictionary_mut().remove(PARAM_VERSION);

        let key = composite();
        let a = derive_key(&explicit, &key, &portable()).unwrap();
        let b = derive_key(&implicit, &key, &portable()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    fn arena_blocks() -> usize {
        ARGON2_ARENA.with(|arena| arena.borrow().len())
    }

    #[test]
    fn test_argon2_arena_follows_request_size() {
        let key = composite();

        let large = KdfParameters::argon2(Argon2Variant::Argon2d, 8 * 1024 * 1024, 1, 1);
        derive_key(&large, &key, &native()).unwrap();
        assert_eq!(arena_blocks(), 8 * 1024);

        let small = KdfParameters::argon2(Argon2Variant::Argon2d, 1024 * 1024, 1, 1);
        let derived = derive_key(&small, &key, &native()).unwrap();
        assert_eq!(arena_blocks(), 1024);
        assert_eq!(
            derived.as_bytes(),
            derive_key(&small, &key, &portable()).unwrap().as_bytes()
        );

        let oversized = KdfParameters::argon2(Argon2Variant::Argon2d, 20 * 1024 * 1024, 1, 1);
        derive_key(&oversized, &key, &native()).unwrap();
        assert_eq!(arena_blocks(), 0);
    }

    #[test]
    fn test_argon2_short_salt_fails() {
        let mut params = KdfParameters::argon2(Argon2Variant::Argon2id, 64 * 1024, 1, 1);
        params.set_seed(vec![1, 2, 3]);
        assert!(matches!(
            derive_key(&params, &composite(), &portable()),
            Err(Error::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_resolve_from_parsed_dictionary() {
        let mut dict = VariantDictionary::new();
        dict.set("$UUID", VariantValue::Bytes(AES_KDF_ID.as_bytes().to_vec()));
        dict.set(PARAM_ROUNDS, VariantValue::UInt64(6000));
        dict.set(PARAM_SEED, VariantValue::Bytes(vec![0u8; 32]));
        let params = KdfParameters::from_bytes(&dict.to_bytes()).unwrap();

        let transformer = KeyTransformer::resolve(&params).unwrap();
        assert_eq!(transformer.id(), AES_KDF_ID);
        assert_eq!(transformer.name(), "AES-KDF");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let (params, _) = rfc9106(Argon2Variant::Argon2d);
        let transformer = KeyTransformer::resolve(&params).unwrap();
        let debug = format!("{:?}", transformer);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("[3, 3"));
    }
}
