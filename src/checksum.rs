//! Checksum utilities for schema content and snapshot integrity

use sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA256 checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Compute checksum from raw bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(format!("{:x}", hash))
    }

    /// Compute checksum over the canonical JSON form of a value
    ///
    /// Only meaningful for values whose serialization is deterministic
    /// (ordered maps, fixed field order).
    pub fn of_serialized<T: Serialize + ?Sized>(value: &T) -> Self {
        let canonical = serde_json::to_vec(value).unwrap_or_default();
        Self::from_bytes(&canonical)
    }

    /// Get the hex string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_checksum_consistency() {
        let content = br#"{"columns": [], "strict": true}"#;
        assert_eq!(Checksum::from_bytes(content), Checksum::from_bytes(content));
    }

    #[test]
    fn test_checksum_different_content() {
        assert_ne!(Checksum::from_bytes(b"a"), Checksum::from_bytes(b"b"));
    }

    #[test]
    fn test_checksum_is_hex_sha256() {
        let checksum = Checksum::from_bytes(b"snapshot body");
        assert_eq!(checksum.as_str().len(), 64);
        assert!(checksum.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_serialized_checksum_is_order_independent_for_btree() {
        let mut first = BTreeMap::new();
        first.insert("b", 2);
        first.insert("a", 1);
        let mut second = BTreeMap::new();
        second.insert("a", 1);
        second.insert("b", 2);
        assert_eq!(Checksum::of_serialized(&first), Checksum::of_serialized(&second));
    }
}
