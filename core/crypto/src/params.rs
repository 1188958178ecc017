//! Typed variant dictionary carrying key derivation parameters.
//!
//! # Format
//! - Version: u16 LE, `0x0100` (only the major byte is checked)
//! - Entries: type (1) + name length (i32 LE) + name + value length (i32 LE) + value
//! - Terminator: a single `0x00` type byte

use vaultcodec_common::{Error, KdfId, Result};

use crate::keys::random_bytes;

/// Dictionary format version written by this implementation.
pub const DICTIONARY_VERSION: u16 = 0x0100;

const VERSION_CRITICAL_MASK: u16 = 0xFF00;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTES: u8 = 0x42;

/// Parameter key holding the KDF identifier.
pub const PARAM_UUID: &str = "$UUID";
/// AES-KDF transform rounds (u64).
pub const PARAM_ROUNDS: &str = "R";
/// Seed or salt (bytes).
pub const PARAM_SEED: &str = "S";
/// Argon2 parallelism (u32).
pub const PARAM_PARALLELISM: &str = "P";
/// Argon2 memory in bytes (u64).
pub const PARAM_MEMORY: &str = "M";
/// Argon2 iterations (u64).
pub const PARAM_ITERATIONS: &str = "I";
/// Argon2 version (u32).
pub const PARAM_VERSION: &str = "V";
/// Argon2 secret key (bytes).
pub const PARAM_SECRET_KEY: &str = "K";
/// Argon2 associated data (bytes).
pub const PARAM_ASSOC_DATA: &str = "A";

/// Length of generated seeds and salts.
pub const SEED_LENGTH: usize = 32;

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantValue {
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl VariantValue {
    fn type_byte(&self) -> u8 {
        match self {
            VariantValue::UInt32(_) => TYPE_UINT32,
            VariantValue::UInt64(_) => TYPE_UINT64,
            VariantValue::Bool(_) => TYPE_BOOL,
            VariantValue::Int32(_) => TYPE_INT32,
            VariantValue::Int64(_) => TYPE_INT64,
            VariantValue::String(_) => TYPE_STRING,
            VariantValue::Bytes(_) => TYPE_BYTES,
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            VariantValue::UInt32(v) => v.to_le_bytes().to_vec(),
            VariantValue::UInt64(v) => v.to_le_bytes().to_vec(),
            VariantValue::Bool(v) => vec![u8::from(*v)],
            VariantValue::Int32(v) => v.to_le_bytes().to_vec(),
            VariantValue::Int64(v) => v.to_le_bytes().to_vec(),
            VariantValue::String(v) => v.as_bytes().to_vec(),
            VariantValue::Bytes(v) => v.clone(),
        }
    }

    fn decode(type_byte: u8, data: &[u8]) -> Result<Self> {
        let fixed = |len: usize| -> Result<&[u8]> {
            if data.len() == len {
                Ok(data)
            } else {
                Err(Error::Format(format!(
                    "Variant value of type {:#04x} has length {}, expected {}",
                    type_byte,
                    data.len(),
                    len
                )))
            }
        };
        Ok(match type_byte {
            TYPE_UINT32 => VariantValue::UInt32(u32::from_le_bytes(to_array(fixed(4)?)?)),
            TYPE_UINT64 => VariantValue::UInt64(u64::from_le_bytes(to_array(fixed(8)?)?)),
            TYPE_BOOL => VariantValue::Bool(fixed(1)?[0] != 0),
            TYPE_INT32 => VariantValue::Int32(i32::from_le_bytes(to_array(fixed(4)?)?)),
            TYPE_INT64 => VariantValue::Int64(i64::from_le_bytes(to_array(fixed(8)?)?)),
            TYPE_STRING => VariantValue::String(
                String::from_utf8(data.to_vec())
                    .map_err(|_| Error::Format("Variant string is not valid UTF-8".to_string()))?,
            ),
            TYPE_BYTES => VariantValue::Bytes(data.to_vec()),
            other => {
                return Err(Error::Format(format!("Unknown variant type: {:#04x}", other)));
            }
        })
    }
}

fn to_array<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.try_into()
        .map_err(|_| Error::Format(format!("Expected {} bytes, got {}", N, data.len())))
}

/// Ordered map of named typed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDictionary {
    entries: Vec<(String, VariantValue)>,
}

impl VariantDictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    pub fn get(&self, name: &str) -> Option<&VariantValue> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, value)| value)
    }

    /// Insert or replace a value, keeping the original position on replace.
    pub fn set(&mut self, name: &str, value: VariantValue) {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Remove a value.
    pub fn remove(&mut self, name: &str) -> Option<VariantValue> {
        let index = self.entries.iter().position(|(key, _)| key == name)?;
        Some(self.entries.remove(index).1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariantValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        match self.get(name)? {
            VariantValue::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            VariantValue::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.get(name)? {
            VariantValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&DICTIONARY_VERSION.to_le_bytes());
        for (name, value) in &self.entries {
            let encoded = value.encode();
            out.push(value.type_byte());
            out.extend_from_slice(&(name.len() as i32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&(encoded.len() as i32).to_le_bytes());
            out.extend_from_slice(&encoded);
        }
        out.push(TYPE_END);
        out
    }

    /// Parse the wire format.
    ///
    /// # Errors
    /// - Unsupported major version
    /// - Truncated data, negative lengths, unknown value types
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data: bytes, pos: 0 };

        let version = u16::from_le_bytes(to_array(cursor.take(2)?)?);
        if version & VERSION_CRITICAL_MASK > DICTIONARY_VERSION & VERSION_CRITICAL_MASK {
            return Err(Error::Format(format!(
                "Unsupported variant dictionary version: {:#06x}",
                version
            )));
        }

        let mut dict = Self::new();
        loop {
            let type_byte = cursor.take(1)?[0];
            if type_byte == TYPE_END {
                break;
            }
            let name_len = cursor.take_len()?;
            let name = String::from_utf8(cursor.take(name_len)?.to_vec())
                .map_err(|_| Error::Format("Variant name is not valid UTF-8".to_string()))?;
            let value_len = cursor.take_len()?;
            let value = VariantValue::decode(type_byte, cursor.take(value_len)?)?;
            dict.set(&name, value);
        }
        Ok(dict)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::Format("Variant dictionary is truncated".to_string()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_len(&mut self) -> Result<usize> {
        let len = i32::from_le_bytes(to_array(self.take(4)?)?);
        usize::try_from(len).map_err(|_| Error::Format(format!("Negative variant length: {}", len)))
    }
}

/// Key derivation parameters: a variant dictionary whose `$UUID` entry
/// names the function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParameters {
    dict: VariantDictionary,
}

impl KdfParameters {
    /// Create parameters for the function `id` with no other entries.
    pub fn new(id: KdfId) -> Self {
        let mut dict = VariantDictionary::new();
        dict.set(PARAM_UUID, VariantValue::Bytes(id.as_bytes().to_vec()));
        Self { dict }
    }

    /// Wrap an existing dictionary.
    pub fn from_dictionary(dict: VariantDictionary) -> Self {
        Self { dict }
    }

    /// The function identifier.
    ///
    /// # Errors
    /// - Returns error if `$UUID` is missing or malformed
    pub fn kdf_id(&self) -> Result<KdfId> {
        let bytes = self
            .dict
            .get_bytes(PARAM_UUID)
            .ok_or_else(|| Error::Format("KDF parameters have no $UUID entry".to_string()))?;
        KdfId::from_slice(bytes)
    }

    /// Seed or salt, empty when not set.
    pub fn seed(&self) -> &[u8] {
        self.dict.get_bytes(PARAM_SEED).unwrap_or(&[])
    }

    /// Set the seed or salt.
    pub fn set_seed(&mut self, seed: Vec<u8>) {
        self.dict.set(PARAM_SEED, VariantValue::Bytes(seed));
    }

    /// Replace the seed or salt with fresh random bytes.
    pub fn randomize_seed(&mut self) {
        self.set_seed(random_bytes(SEED_LENGTH));
    }

    /// Underlying dictionary.
    pub fn dictionary(&self) -> &VariantDictionary {
        &self.dict
    }

    /// Mutable access to the underlying dictionary.
    pub fn dictionary_mut(&mut self) -> &mut VariantDictionary {
        &mut self.dict
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.dict.to_bytes()
    }

    /// Parse the wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        VariantDictionary::from_bytes(bytes).map(Self::from_dictionary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_roundtrip_all_types() {
        let mut dict = VariantDictionary::new();
        dict.set("u32", VariantValue::UInt32(7));
        dict.set("u64", VariantValue::UInt64(u64::MAX));
        dict.set("bool", VariantValue::Bool(true));
        dict.set("i32", VariantValue::Int32(-5));
        dict.set("i64", VariantValue::Int64(-9_000_000_000));
        dict.set("str", VariantValue::String("héllo".to_string()));
        dict.set("bytes", VariantValue::Bytes(vec![1, 2, 3]));

        let restored = VariantDictionary::from_bytes(&dict.to_bytes()).unwrap();
        assert_eq!(restored, dict);
    }

    #[test]
    fn test_known_encoding() {
        let mut dict = VariantDictionary::new();
        dict.set("R", VariantValue::UInt64(6000));

        let bytes = dict.to_bytes();
        let expected: Vec<u8> = [
            &[0x00, 0x01][..],
            &[TYPE_UINT64],
            &1i32.to_le_bytes(),
            b"R",
            &8i32.to_le_bytes(),
            &6000u64.to_le_bytes(),
            &[TYPE_END],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut dict = VariantDictionary::new();
        dict.set("a", VariantValue::UInt32(1));
        dict.set("b", VariantValue::UInt32(2));
        dict.set("a", VariantValue::UInt32(3));

        let keys: Vec<&str> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(dict.get_u32("a"), Some(3));
    }

    #[test]
    fn test_rejects_newer_major_version() {
        let bytes = [0x00, 0x02, TYPE_END];
        assert!(VariantDictionary::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_accepts_minor_version_bump() {
        let bytes = [0x05, 0x01, TYPE_END];
        assert!(VariantDictionary::from_bytes(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_truncated_and_bad_lengths() {
        let mut dict = VariantDictionary::new();
        dict.set("S", VariantValue::Bytes(vec![0u8; 32]));
        let bytes = dict.to_bytes();

        assert!(VariantDictionary::from_bytes(&bytes[..bytes.len() - 5]).is_err());
        assert!(VariantDictionary::from_bytes(&[0x00, 0x01]).is_err());

        let mut bad_u32 = vec![0x00, 0x01, TYPE_UINT32];
        bad_u32.extend_from_slice(&1i32.to_le_bytes());
        bad_u32.push(b'P');
        bad_u32.extend_from_slice(&3i32.to_le_bytes());
        bad_u32.extend_from_slice(&[1, 2, 3, TYPE_END]);
        assert!(VariantDictionary::from_bytes(&bad_u32).is_err());

        let mut negative = vec![0x00, 0x01, TYPE_BYTES];
        negative.extend_from_slice(&(-1i32).to_le_bytes());
        assert!(VariantDictionary::from_bytes(&negative).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut bytes = vec![0x00, 0x01, 0x77];
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.push(b'x');
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.push(TYPE_END);
        assert!(VariantDictionary::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_kdf_parameters_id_and_seed() {
        let id = KdfId::from_bytes([0x11; 16]);
        let mut params = KdfParameters::new(id);
        assert_eq!(params.kdf_id().unwrap(), id);
        assert!(params.seed().is_empty());

        params.randomize_seed();
        assert_eq!(params.seed().len(), SEED_LENGTH);

        let restored = KdfParameters::from_bytes(&params.to_bytes()).unwrap();
        assert_eq!(restored, params);
    }

    #[test]
    fn test_kdf_parameters_missing_id() {
        let params = KdfParameters::from_dictionary(VariantDictionary::new());
        assert!(params.kdf_id().is_err());
    }

    fn value() -> impl proptest::strategy::Strategy<Value = VariantValue> {
        use proptest::prelude::*;
        prop_oneof![
            any::<u32>().prop_map(VariantValue::UInt32),
            any::<u64>().prop_map(VariantValue::UInt64),
            any::<bool>().prop_map(VariantValue::Bool),
            any::<i32>().prop_map(VariantValue::Int32),
            any::<i64>().prop_map(VariantValue::Int64),
            ".{0,24}".prop_map(VariantValue::String),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(VariantValue::Bytes),
        ]
    }

    proptest::proptest! {
        #[test]
        fn test_dictionary_preserves_entries(
            entries in proptest::collection::vec(("[A-Za-z$]{1,8}", value()), 0..12),
        ) {
            let mut dict = VariantDictionary::new();
            for (name, value) in &entries {
                dict.set(name, value.clone());
            }
            let parsed = VariantDictionary::from_bytes(&dict.to_bytes()).unwrap();
            proptest::prop_assert_eq!(parsed, dict);
        }

        #[test]
        fn test_arbitrary_input_never_panics(
            bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256),
        ) {
            let _ = VariantDictionary::from_bytes(&bytes);
        }
    }
}
