//! Git object identifier (SHA-1 hash)
//!
//! Object IDs are 40-character hexadecimal strings representing SHA-1 hashes.
//! They uniquely identify all objects in the store (blobs, trees, commits).
//!
//! ## Format
//!
//! - Full: 40 hex characters (e.g., "abc123...def")
//! - Short: First 7 characters (e.g., "abc123")
//!
//! ## Storage
//!
//! Loose objects live in `objects/<first-2-chars>/<remaining-38-chars>`,
//! packed objects are looked up by their 20 raw bytes in a pack index.

use crate::artifacts::objects::{OBJECT_ID_LENGTH, RAW_OBJECT_ID_LENGTH};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

/// Git object identifier (SHA-1 hash)
///
/// A 40-character lowercase hexadecimal string that uniquely identifies an object.
/// Two ids are equal exactly when their hex strings are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectId(String);

impl ObjectId {
    /// Parse and validate an object ID from a string
    ///
    /// Uppercase hex digits are accepted and folded to lowercase, so that the
    /// same hash always maps to the same id.
    pub fn try_parse(id: String) -> anyhow::Result<Self> {
        if id.len() != OBJECT_ID_LENGTH {
            return Err(anyhow::anyhow!("Invalid object ID length: {}", id.len()));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow::anyhow!("Invalid object ID characters: {}", id));
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    /// Build an object ID from its 20 raw bytes
    pub fn from_raw(raw: &[u8]) -> anyhow::Result<Self> {
        if raw.len() != RAW_OBJECT_ID_LENGTH {
            return Err(anyhow::anyhow!("Invalid raw object ID length: {}", raw.len()));
        }

        let hex40 = raw
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Ok(Self(hex40))
    }

    /// The 20 raw bytes of the hash
    pub fn to_raw(&self) -> [u8; RAW_OBJECT_ID_LENGTH] {
        let mut raw = [0u8; RAW_OBJECT_ID_LENGTH];
        for (i, byte) in raw.iter_mut().enumerate() {
            // the constructor guarantees 40 hex digits
            *byte = u8::from_str_radix(&self.0[i * 2..i * 2 + 2], 16).unwrap_or_default();
        }
        raw
    }

    /// Write the object ID in binary format (20 bytes)
    ///
    /// Used when serializing tree objects.
    pub fn write_h40_to<W: io::Write>(&self, writer: &mut W) -> anyhow::Result<()> {
        writer.write_all(&self.to_raw())?;
        Ok(())
    }

    /// Read an object ID from binary format (20 bytes)
    ///
    /// Used when deserializing tree objects.
    pub fn read_h40_from<R: io::Read + ?Sized>(reader: &mut R) -> anyhow::Result<Self> {
        let mut raw = [0u8; RAW_OBJECT_ID_LENGTH];
        reader.read_exact(&mut raw)?;

        Self::from_raw(&raw)
    }

    /// Convert to file system path for loose object storage
    ///
    /// Splits the hash as `XX/YYYYYY...` where XX is the first 2 chars.
    pub fn to_path(&self) -> PathBuf {
        let (dir, file) = self.0.split_at(2);
        PathBuf::from(dir).join(file)
    }

    /// First 7 characters of the hash (standard abbreviation)
    pub fn to_short_oid(&self) -> String {
        self.0.split_at(7).0.to_string()
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ObjectId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s.trim().to_string())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ObjectId::try_parse(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn uppercase_hashes_fold_to_the_same_id() {
        let lower = ObjectId::try_parse("ab".repeat(20)).unwrap();
        let upper = ObjectId::try_parse("AB".repeat(20)).unwrap();

        assert_eq!(lower, upper);
    }

    #[test]
    fn raw_bytes_match_hex_form() {
        let oid = ObjectId::try_parse("0123456789abcdef0123456789abcdef01234567".to_string())
            .unwrap();

        let raw = oid.to_raw();
        assert_eq!(raw[0], 0x01);
        assert_eq!(raw[19], 0x67);
        assert_eq!(ObjectId::from_raw(&raw).unwrap(), oid);
    }

    #[test]
    fn rejects_short_and_non_hex_ids() {
        assert!(ObjectId::try_parse("abc".to_string()).is_err());
        assert!(ObjectId::try_parse("z".repeat(40)).is_err());
    }
}
