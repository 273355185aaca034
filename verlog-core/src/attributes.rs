//! Record identity and attribute access
//!
//! The engine never owns a record. Hosts expose their entity through
//! [`VersionedRecord`]: a stable identity, a snapshot of the attribute map,
//! and a way to write a new attribute map back.

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute value as seen by the engine
pub type AttributeValue = serde_json::Value;

/// Named attributes of a record, ordered by name
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Stable identity of a versioned record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record id from any string-like key
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random record id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A host entity whose attribute changes are tracked
pub trait VersionedRecord: Send + Sync {
    /// Identity used to key the record's history
    fn record_id(&self) -> &RecordId;

    /// Snapshot of the record's current attributes
    fn attributes(&self) -> AttributeMap;

    /// Persist `attributes` as the record's new state.
    ///
    /// Implementations must either apply the whole map or leave the record untouched.
    fn write_attributes(&mut self, attributes: AttributeMap) -> anyhow::Result<()>;
}

/// In-memory record, useful for hosts that keep their state in process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    id: RecordId,
    attributes: AttributeMap,
}

impl MemoryRecord {
    /// Create an empty record with a generated id
    pub fn new() -> Self {
        Self::with_id(RecordId::generate())
    }

    /// Create an empty record with the given id
    pub fn with_id(id: RecordId) -> Self {
        Self {
            id,
            attributes: AttributeMap::new(),
        }
    }

    /// Get an attribute value
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

impl Default for MemoryRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedRecord for MemoryRecord {
    fn record_id(&self) -> &RecordId {
        &self.id
    }

    fn attributes(&self) -> AttributeMap {
        self.attributes.clone()
    }

    fn write_attributes(&mut self, attributes: AttributeMap) -> anyhow::Result<()> {
        self.attributes = attributes;
        Ok(())
    }
}

/// Convert a serializable host value into an attribute map.
///
/// The value must serialize to a JSON object; anything else is a serialization failure.
pub fn attributes_from<T: Serialize>(value: &T) -> Result<AttributeMap> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(fields) => Ok(fields.into_iter().collect()),
        other => Err(HistoryError::Serialization(format!(
            "expected an object of attributes, got {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &AttributeValue) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
