//! Verlog Core Library
//!
//! Version history for mutable records:
//! - Changeset capture (previous values of changed attributes) and storage codec
//! - Append-only version store per record (in-memory and SQLite backends)
//! - History lookup by sequence, tag, timestamp, endpoint or version reference
//! - Replay of any past attribute state
//! - Revert with faithful bookkeeping of what the record was reverted to

pub mod attributes;
pub mod changeset;
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod locator;
pub mod replay;
pub mod sqlite_store;
pub mod store;
pub mod version;
pub mod versions;

pub use attributes::{attributes_from, AttributeMap, AttributeValue, MemoryRecord, RecordId, VersionedRecord};
pub use changeset::{Changeset, ChangesetCodec, Compression};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{HistoryConfig, StoreBackend};
pub use error::{HistoryError, Result};
pub use history::History;
pub use locator::{Endpoint, Locator, VersionRef};
pub use sqlite_store::SqliteVersionStore;
pub use store::{MemoryVersionStore, VersionStore};
pub use version::{MetadataUpdate, NewVersion, Version, VersionRow};
pub use versions::{TimeRule, Versions};
