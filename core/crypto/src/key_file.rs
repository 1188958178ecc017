//! XML key files.
//!
//! # Format
//! ```xml
//! <KeyFile>
//!     <Meta><Version>2.0</Version></Meta>
//!     <Key><Data Hash="A1B2C3D4">0123 4567 ...</Data></Key>
//! </KeyFile>
//! ```
//! - Version 1.0: `Data` holds the key in base64
//! - Version 2.0: `Data` holds the key in hex, grouped with whitespace;
//!   `Hash` is the hex of the first 4 bytes of the key's SHA-256
//!
//! A document that is not a well-formed key file yields `None` and the
//! caller treats the content as an ordinary key file.

use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::Reader;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::keys::{sha256, KEY_LENGTH};

const ROOT: &str = "keyfile";
const META: &str = "meta";
const VERSION: &str = "version";
const KEY: &str = "key";
const DATA: &str = "data";
const HASH_ATTRIBUTE: &[u8] = b"hash";

/// Length of the v2 `Hash` attribute in bytes.
const CHECKSUM_LENGTH: usize = 4;

#[derive(Default)]
struct KeyFileXml {
    version: Option<String>,
    data: Option<Zeroizing<String>>,
    hash: Option<String>,
}

/// Decode the key stored in an XML key file.
pub fn parse_xml(content: &[u8]) -> Option<Zeroizing<[u8; KEY_LENGTH]>> {
    let text = std::str::from_utf8(content).ok()?;
    let xml = read_document(text)?;

    let version = xml
        .version
        .as_deref()
        .map(strip_whitespace)
        .unwrap_or_else(|| "1.0".to_string());
    let data = Zeroizing::new(strip_whitespace(xml.data.as_deref()?));

    let decoded = match version.parse::<f32>().ok()? {
        v if v == 1.0 => Zeroizing::new(base64::engine::general_purpose::STANDARD.decode(data.as_bytes()).ok()?),
        v if v == 2.0 => {
            let decoded = Zeroizing::new(hex::decode(data.as_bytes()).ok()?);
            let expected = hex::decode(strip_whitespace(xml.hash.as_deref()?)).ok()?;
            let digest = sha256(&[decoded.as_slice()]);
            if expected.len() != CHECKSUM_LENGTH
                || !bool::from(digest[..CHECKSUM_LENGTH].ct_eq(expected.as_slice()))
            {
                warn!("XML key file checksum mismatch");
                return None;
            }
            decoded
        }
        other => {
            debug!(version = other, "Unsupported XML key file version");
            return None;
        }
    };

    if decoded.len() != KEY_LENGTH {
        debug!(length = decoded.len(), "XML key file key has unexpected length");
        return None;
    }
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&decoded);
    Some(key)
}

fn read_document(text: &str) -> Option<KeyFileXml> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut xml = KeyFileXml::default();
    loop {
        match reader.read_event().ok()? {
            Event::Start(element) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).to_ascii_lowercase();
                if path.is_empty() && name != ROOT {
                    return None;
                }
                path.push(name);
                if at(&path, &[ROOT, KEY, DATA]) {
                    for attribute in element.attributes().flatten() {
                        if attribute.key.as_ref().eq_ignore_ascii_case(HASH_ATTRIBUTE) {
                            xml.hash = Some(attribute.unescape_value().ok()?.into_owned());
                        }
                    }
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(value) => {
                let value = value.unescape().ok()?;
                if at(&path, &[ROOT, META, VERSION]) {
                    xml.version = Some(value.into_owned());
                } else if at(&path, &[ROOT, KEY, DATA]) {
                    xml.data = Some(Zeroizing::new(value.into_owned()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Some(xml)
}

fn at(path: &[String], names: &[&str]) -> bool {
    path.len() == names.len() && path.iter().zip(names).all(|(a, b)| a == b)
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v2(key: &[u8; KEY_LENGTH], hash: &str) -> String {
        let hex = hex::encode_upper(key);
        let grouped: Vec<&str> = (0..hex.len()).step_by(8).map(|i| &hex[i..i + 8]).collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<KeyFile>\n\t<Meta>\n\t\t<Version>2.0</Version>\n\t</Meta>\n\t<Key>\n\t\t<Data Hash=\"{}\">\n\t\t\t{}\n\t\t</Data>\n\t</Key>\n</KeyFile>\n",
            hash,
            grouped.join(" ")
        )
    }

    fn checksum(key: &[u8]) -> String {
        hex::encode_upper(&sha256(&[key])[..CHECKSUM_LENGTH])
    }

    #[test]
    fn test_version_1_base64() {
        let key = [0x42u8; KEY_LENGTH];
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><KeyFile><Meta><Version>1.00</Version></Meta><Key><Data>{}</Data></Key></KeyFile>",
            base64::engine::general_purpose::STANDARD.encode(key)
        );
        assert_eq!(*parse_xml(xml.as_bytes()).unwrap(), key);
    }

    #[test]
    fn test_version_2_hex_with_checksum() {
        let key: [u8; KEY_LENGTH] = std::array::from_fn(|i| i as u8);
        let xml = v2(&key, &checksum(&key));
        assert_eq!(*parse_xml(xml.as_bytes()).unwrap(), key);

        // Lowercase checksum is accepted
        let xml = v2(&key, &checksum(&key).to_lowercase());
        assert_eq!(*parse_xml(xml.as_bytes()).unwrap(), key);
    }

    #[test]
    fn test_version_2_bad_checksum() {
        let key = [7u8; KEY_LENGTH];
        let xml = v2(&key, "00000000");
        assert!(parse_xml(xml.as_bytes()).is_none());
    }

    #[test]
    fn test_version_2_missing_checksum() {
        let xml = format!(
            "<KeyFile><Meta><Version>2.0</Version></Meta><Key><Data>{}</Data></Key></KeyFile>",
            hex::encode([1u8; KEY_LENGTH])
        );
        assert!(parse_xml(xml.as_bytes()).is_none());
    }

    #[test]
    fn test_not_a_key_file() {
        assert!(parse_xml(b"<Database><Key><Data>AAAA</Data></Key></Database>").is_none());
        assert!(parse_xml(&[0xffu8, 0xfe, 0x00, 0x01]).is_none());
        assert!(parse_xml(b"<KeyFile><Key><Data>not base64!</Data></Key></KeyFile>").is_none());
    }
}
