//! Version entity and its storage forms

use crate::attributes::RecordId;
use crate::changeset::{Changeset, ChangesetCodec};
use crate::error::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One immutable entry in a record's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    /// Record this version belongs to
    pub record_id: RecordId,
    /// Position in the record's history, starting at 1
    pub sequence: u64,
    /// Previous values of the attributes changed by this version
    pub changeset: Changeset,
    /// Optional caller label
    pub tag: Option<String>,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Effective origin the record was rolled back to, for revert versions
    pub reverted_to: Option<u64>,
}

impl Version {
    /// Decode a stored row
    pub fn from_row(record_id: RecordId, row: &VersionRow, codec: &ChangesetCodec) -> Result<Self> {
        Ok(Self {
            record_id,
            sequence: row.sequence,
            changeset: codec.decode(&row.changeset)?,
            tag: row.tag.clone(),
            created_at: row.created_at,
            reverted_to: row.reverted_to,
        })
    }

    /// The record's first captured state
    pub fn is_initial(&self) -> bool {
        self.sequence == 1
    }

    pub fn is_revert(&self) -> bool {
        self.reverted_to.is_some()
    }

    /// Sequence this version logically stands for.
    ///
    /// A revert version stands for the state it restored, so this is
    /// `reverted_to` when set and the version's own sequence otherwise.
    pub fn original_sequence(&self) -> u64 {
        self.reverted_to.unwrap_or(self.sequence)
    }
}

// Versions are only comparable within a single record.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.record_id == other.record_id && self.sequence == other.sequence
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.record_id != other.record_id {
            return None;
        }
        Some(self.sequence.cmp(&other.sequence))
    }
}

/// A version as held by a store, changeset still encoded
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRow {
    pub sequence: u64,
    pub changeset: Bytes,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reverted_to: Option<u64>,
}

/// A version about to be appended
#[derive(Debug, Clone)]
pub struct NewVersion {
    /// Sequence the writer expects the store to assign
    pub sequence: u64,
    pub changeset: Bytes,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reverted_to: Option<u64>,
}

impl NewVersion {
    pub fn into_row(self) -> VersionRow {
        VersionRow {
            sequence: self.sequence,
            changeset: self.changeset,
            tag: self.tag,
            created_at: self.created_at,
            reverted_to: self.reverted_to,
        }
    }
}

/// Metadata corrections allowed on an existing version
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    /// Replace the tag (`Some(None)` clears it)
    pub tag: Option<Option<String>>,
    /// Replace the creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl MetadataUpdate {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(Some(tag.into())),
            created_at: None,
        }
    }

    pub fn created_at(created_at: DateTime<Utc>) -> Self {
        Self {
            tag: None,
            created_at: Some(created_at),
        }
    }

    pub fn apply(&self, row: &mut VersionRow) {
        if let Some(tag) = &self.tag {
            row.tag = tag.clone();
        }
        if let Some(created_at) = self.created_at {
            row.created_at = created_at;
        }
    }
}
