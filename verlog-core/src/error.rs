//! Error types for history operations

use crate::attributes::RecordId;

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors that can occur while recording, querying or reverting history
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A locator did not map to any point in the record's history.
    ///
    /// Read queries turn this into an empty result; only `revert_to` surfaces it.
    #[error("Unresolvable locator for record {record}: {locator}")]
    UnresolvableLocator { record: RecordId, locator: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another writer appended to the record between our snapshot and our append.
    #[error("Concurrent mutation on record {record}: expected to write sequence {expected}, store is at {found}")]
    ConcurrentMutationConflict {
        record: RecordId,
        expected: u64,
        found: u64,
    },

    #[error("Version {sequence} not found for record {record}")]
    VersionNotFound { record: RecordId, sequence: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Record write failed: {0}")]
    RecordWrite(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for HistoryError {
    fn from(e: rusqlite::Error) -> Self {
        HistoryError::Database(e.to_string())
    }
}
