//! SQLite-backed version store
//!
//! All records share one `versions` table keyed by `(record_id, sequence)`.
//! Appends run in an IMMEDIATE transaction that re-reads the latest
//! sequence, so two processes writing the same record cannot both succeed.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::attributes::RecordId;
use crate::error::{HistoryError, Result};
use crate::store::{VersionStore, check_next_sequence};
use crate::version::{MetadataUpdate, NewVersion, VersionRow};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS versions (
    record_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    changeset BLOB NOT NULL,
    tag TEXT,
    created_at TEXT NOT NULL,
    reverted_to INTEGER,
    PRIMARY KEY (record_id, sequence)
) WITHOUT ROWID;";

const SELECT_COLUMNS: &str = "SELECT sequence,changeset,tag,created_at,reverted_to FROM versions";

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| HistoryError::Database(format!("Bad created_at '{}': {}", text, e)))
}

fn read_row(row: &rusqlite::Row<'_>) -> Result<VersionRow> {
    let sequence: i64 = row.get(0)?;
    let changeset: Vec<u8> = row.get(1)?;
    let tag: Option<String> = row.get(2)?;
    let created_at: String = row.get(3)?;
    let reverted_to: Option<i64> = row.get(4)?;
    Ok(VersionRow {
        sequence: sequence as u64,
        changeset: changeset.into(),
        tag,
        created_at: parse_time(&created_at)?,
        reverted_to: reverted_to.map(|r| r as u64),
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

/// Version store persisted in an SQLite database
pub struct SqliteVersionStore {
    conn: Mutex<Connection>,
}

impl SqliteVersionStore {
    /// Open or create a database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| HistoryError::Database(format!("Failed to create {:?}: {}", parent, e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Opened SQLite version store at {:?}", path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HistoryError::LockPoisoned(format!("sqlite connection: {}", e)))
    }

    fn fetch(conn: &Connection, record: &RecordId, sequence: u64) -> Result<Option<VersionRow>> {
        let sql = format!("{} WHERE record_id=?1 AND sequence=?2", SELECT_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(rusqlite::params![record.as_str(), sequence as i64])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl VersionStore for SqliteVersionStore {
    async fn append(&self, record: &RecordId, entry: NewVersion) -> Result<VersionRow> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence),0) FROM versions WHERE record_id=?1",
            rusqlite::params![record.as_str()],
            |r| r.get(0),
        )?;
        check_next_sequence(record, latest as u64, &entry)?;

        let inserted = tx.execute(
            "INSERT INTO versions (record_id,sequence,changeset,tag,created_at,reverted_to) \
             VALUES (?1,?2,?3,?4,?5,?6)",
            rusqlite::params![
                record.as_str(),
                entry.sequence as i64,
                entry.changeset.as_ref(),
                entry.tag,
                format_time(&entry.created_at),
                entry.reverted_to.map(|r| r as i64),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(HistoryError::ConcurrentMutationConflict {
                    record: record.clone(),
                    expected: entry.sequence,
                    found: entry.sequence,
                });
            }
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;

        Ok(entry.into_row())
    }

    async fn list(&self, record: &RecordId) -> Result<Vec<VersionRow>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE record_id=?1 ORDER BY sequence", SELECT_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(rusqlite::params![record.as_str()])?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(read_row(row)?);
        }
        Ok(result)
    }

    async fn latest(&self, record: &RecordId) -> Result<Option<VersionRow>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE record_id=?1 ORDER BY sequence DESC LIMIT 1", SELECT_COLUMNS);
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(rusqlite::params![record.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(row)?)),
            None => Ok(None),
        }
    }

    async fn update_metadata(
        &self,
        record: &RecordId,
        sequence: u64,
        update: MetadataUpdate,
    ) -> Result<VersionRow> {
        let conn = self.conn()?;
        let mut row = Self::fetch(&conn, record, sequence)?.ok_or_else(|| {
            HistoryError::VersionNotFound {
                record: record.clone(),
                sequence,
            }
        })?;
        update.apply(&mut row);

        conn.execute(
            "UPDATE versions SET tag=?1,created_at=?2 WHERE record_id=?3 AND sequence=?4",
            rusqlite::params![
                row.tag,
                format_time(&row.created_at),
                record.as_str(),
                sequence as i64,
            ],
        )?;
        Ok(row)
    }
}
