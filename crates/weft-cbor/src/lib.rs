//! Canonical CBOR encoding and content hashing.
//!
//! Every durable record in the fabric (WAL records, journal entries,
//! snapshots) is encoded with the canonical serializer so that identical
//! values always produce identical bytes. The `payload_hash` integrity
//! checks on replay depend on that.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Serialize a value as canonical, self-describing CBOR.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    let mut buf = Vec::with_capacity(128);
    let mut ser = serde_cbor::ser::Serializer::new(&mut buf);
    let _ = ser.self_describe();
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// SHA-256 content hash, displayed as `sha256:<hex>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let out = hasher.finalize();
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&out);
        Hash(arr)
    }

    pub fn of_cbor<T: Serialize>(value: &T) -> Result<Self, serde_cbor::Error> {
        Ok(Self::of_bytes(&to_canonical_cbor(value)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("sha256:{}", hex::encode(self.0))
    }

    /// Parse the `sha256:<hex>` display form back into a hash.
    pub fn parse(s: &str) -> Result<Self, HashParseError> {
        let hex_part = s
            .strip_prefix("sha256:")
            .ok_or_else(|| HashParseError::MissingPrefix(s.to_string()))?;
        let bytes = hex::decode(hex_part).map_err(|source| HashParseError::Hex {
            value: s.to_string(),
            source,
        })?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashParseError::Length(s.to_string()))?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = Hash;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("32 bytes of SHA-256 digest")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Hash, E> {
                let arr: [u8; 32] = v
                    .try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))?;
                Ok(Hash(arr))
            }
        }
        deserializer.deserialize_bytes(Visitor)
    }
}

#[derive(Debug, Error)]
pub enum HashParseError {
    #[error("hash string '{0}' is missing the 'sha256:' prefix")]
    MissingPrefix(String),
    #[error("hash string '{value}' is not valid hex")]
    Hex {
        value: String,
        #[source]
        source: hex::FromHexError,
    },
    #[error("hash string '{0}' does not decode to 32 bytes")]
    Length(String),
}
