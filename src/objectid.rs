//! 12-byte document identifiers with a 24-char lowercase hex rendering.
//!
//! The generator follows the usual layout (4-byte seconds timestamp, 5-byte
//! per-process random value, 3-byte counter) and is unique within a process;
//! it is not cryptographic.

use color_eyre::eyre::eyre;
use color_eyre::Result;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// A 12-byte opaque identifier, ordered lexicographically on its bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

impl ObjectId {
    /// Generate a new identifier, unique within this process.
    pub fn new() -> Self {
        let unique = PROCESS_UNIQUE.get_or_init(|| rand::thread_rng().gen());
        let counter = COUNTER.get_or_init(|| AtomicU32::new(rand::thread_rng().gen()));

        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let count = counter.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(unique);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        ObjectId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    pub fn bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parse a 24-character lowercase/uppercase hex string.
    pub fn parse_hex(s: &str) -> Result<Self> {
        if s.len() != 24 {
            return Err(eyre!("Invalid ObjectId hex length {}: {}", s.len(), s));
        }
        let decoded = hex::decode(s).map_err(|e| eyre!("Invalid ObjectId hex '{}': {}", s, e))?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&decoded);
        Ok(ObjectId(bytes))
    }

    /// Canonical 24-character lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = color_eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_hex(s)
    }
}

/// True when the string looks like an identifier (24 hex chars).
pub fn is_objectid_hex(s: &str) -> bool {
    s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn hex_round_trip() {
        let id = ObjectId::parse_hex("64bb7ea337b9d8195e3b441d").unwrap();
        assert_eq!(id.to_hex(), "64bb7ea337b9d8195e3b441d");
        assert_eq!(id.bytes().len(), 12);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(ObjectId::parse_hex("64bb7ea3").is_err());
        assert!(ObjectId::parse_hex("zzbb7ea337b9d8195e3b441d").is_err());
        assert!(ObjectId::parse_hex("64bb7ea337b9d8195e3b441d00").is_err());
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<ObjectId> = (0..10_000).map(|_| ObjectId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn ordering_is_lexicographic_on_bytes() {
        let a = ObjectId::from_bytes([0; 12]);
        let mut high = [0u8; 12];
        high[0] = 1;
        let b = ObjectId::from_bytes(high);
        assert!(a < b);
    }

    #[test]
    fn display_is_lowercase() {
        let id = ObjectId::parse_hex("64BB7EA337B9D8195E3B441D").unwrap();
        assert_eq!(id.to_string(), "64bb7ea337b9d8195e3b441d");
    }

    #[test]
    fn hex_detection() {
        assert!(is_objectid_hex("64bb7ea337b9d8195e3b441d"));
        assert!(!is_objectid_hex("not-an-id"));
        assert!(!is_objectid_hex("64bb7ea337b9d8195e3b441"));
    }
}
