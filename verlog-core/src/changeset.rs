//! Changeset capture and storage codec
//!
//! A changeset maps each attribute touched by a mutation to the value it
//! held *before* the mutation. That is exactly what is needed to undo the
//! mutation, which is the only direction replay ever walks.
//!
//! Encoded changesets are framed as:
//!
//! ```text
//! +------+-------------+------------------+---------+
//! | VLCS | compression | sha256(payload)  | payload |
//! | 4 B  | 1 B         | 32 B             | ...     |
//! +------+-------------+------------------+---------+
//! ```
//!
//! The payload is the JSON form of the changeset, optionally zstd-compressed.

use crate::attributes::{AttributeMap, AttributeValue};
use crate::error::{HistoryError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Magic bytes at the start of every encoded changeset.
pub const CHANGESET_MAGIC: &[u8; 4] = b"VLCS";

const HEADER_LEN: usize = 4 + 1 + 32;

/// Attribute name -> value before the change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changeset(BTreeMap<String, AttributeValue>);

impl Changeset {
    /// Create an empty changeset
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Diff two attribute snapshots.
    ///
    /// Only attributes whose value differs end up in the changeset, mapped to
    /// their `before` value. An attribute absent from `before` maps to null.
    pub fn between(before: &AttributeMap, after: &AttributeMap) -> Self {
        let mut changes = BTreeMap::new();
        for name in before.keys().chain(after.keys()) {
            if changes.contains_key(name) {
                continue;
            }
            let old = before.get(name);
            if old != after.get(name) {
                changes.insert(
                    name.clone(),
                    old.cloned().unwrap_or(AttributeValue::Null),
                );
            }
        }
        Self(changes)
    }

    /// Overwrite every entry of the changeset onto `attributes`
    pub fn apply_to(&self, attributes: &AttributeMap) -> AttributeMap {
        let mut result = attributes.clone();
        for (name, value) in &self.0 {
            result.insert(name.clone(), value.clone());
        }
        result
    }

    /// Undo this changeset in place.
    ///
    /// Entries naming an attribute the record no longer has are skipped.
    pub fn undo_onto(&self, attributes: &mut AttributeMap) {
        for (name, value) in &self.0 {
            if let Some(slot) = attributes.get_mut(name) {
                *slot = value.clone();
            }
        }
    }

    /// Previous value recorded for an attribute
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of the changed attributes
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, AttributeValue)> for Changeset {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Compression applied to changeset payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zstd),
            other => Err(HistoryError::Serialization(format!(
                "unknown compression tag {}",
                other
            ))),
        }
    }
}

/// Encodes changesets into storable blobs and back
#[derive(Debug, Clone)]
pub struct ChangesetCodec {
    compression: Compression,
    zstd_level: i32,
    max_encoded_bytes: Option<usize>,
}

impl ChangesetCodec {
    /// Create a codec writing with the given compression
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            zstd_level: 3,
            max_encoded_bytes: None,
        }
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Refuse to encode changesets larger than `limit` bytes
    pub fn with_max_encoded_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_encoded_bytes = limit;
        self
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Encode a changeset into a framed blob
    pub fn encode(&self, changeset: &Changeset) -> Result<Bytes> {
        let json = serde_json::to_vec(changeset)?;
        let payload = match self.compression {
            Compression::None => json,
            Compression::Zstd => zstd::encode_all(json.as_slice(), self.zstd_level)
                .map_err(|e| HistoryError::Serialization(format!("Compression failed: {}", e)))?,
        };

        let encoded_len = HEADER_LEN + payload.len();
        if let Some(limit) = self.max_encoded_bytes {
            if encoded_len > limit {
                return Err(HistoryError::Serialization(format!(
                    "encoded changeset is {} bytes, limit is {}",
                    encoded_len, limit
                )));
            }
        }

        let digest = Sha256::digest(&payload);
        let mut blob = Vec::with_capacity(encoded_len);
        blob.extend_from_slice(CHANGESET_MAGIC);
        blob.push(self.compression.tag());
        blob.extend_from_slice(&digest);
        blob.extend_from_slice(&payload);
        Ok(Bytes::from(blob))
    }

    /// Decode a framed blob, whatever compression it was written with
    pub fn decode(&self, blob: &[u8]) -> Result<Changeset> {
        if blob.len() < HEADER_LEN {
            return Err(HistoryError::Serialization(format!(
                "changeset blob too short: {} bytes",
                blob.len()
            )));
        }
        if &blob[..4] != CHANGESET_MAGIC {
            return Err(HistoryError::Serialization(
                "changeset blob has bad magic".to_string(),
            ));
        }

        let compression = Compression::from_tag(blob[4])?;
        let expected = &blob[5..HEADER_LEN];
        let payload = &blob[HEADER_LEN..];
        let actual = Sha256::digest(payload);
        if actual.as_slice() != expected {
            return Err(HistoryError::Serialization(format!(
                "changeset checksum mismatch: expected {}, got {}",
                hex::encode(expected),
                hex::encode(actual)
            )));
        }

        let json = match compression {
            Compression::None => payload.to_vec(),
            Compression::Zstd => zstd::decode_all(payload)
                .map_err(|e| HistoryError::Serialization(format!("Decompression failed: {}", e)))?,
        };
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for ChangesetCodec {
    fn default() -> Self {
        Self::new(Compression::None)
    }
}
