//! Version store abstraction
//!
//! A store is an append-only log of version rows per record. Rows are
//! returned in ascending sequence order, and every backend must keep the
//! sequences of a record contiguous from 1.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::attributes::RecordId;
use crate::error::{HistoryError, Result};
use crate::version::{MetadataUpdate, NewVersion, VersionRow};

/// Storage backend for version rows
///
/// All backends must implement this trait
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Append a version to a record's log.
    ///
    /// `entry.sequence` must be exactly one past the record's latest
    /// sequence, otherwise the append is rejected with
    /// [`HistoryError::ConcurrentMutationConflict`].
    async fn append(&self, record: &RecordId, entry: NewVersion) -> Result<VersionRow>;

    /// All rows of a record, ascending by sequence
    async fn list(&self, record: &RecordId) -> Result<Vec<VersionRow>>;

    /// Row with the greatest sequence, if any
    async fn latest(&self, record: &RecordId) -> Result<Option<VersionRow>>;

    /// Correct the metadata of an existing row
    async fn update_metadata(
        &self,
        record: &RecordId,
        sequence: u64,
        update: MetadataUpdate,
    ) -> Result<VersionRow>;
}

/// Check that `entry` continues a log whose latest sequence is `latest`
pub(crate) fn check_next_sequence(record: &RecordId, latest: u64, entry: &NewVersion) -> Result<()> {
    if entry.sequence != latest + 1 {
        return Err(HistoryError::ConcurrentMutationConflict {
            record: record.clone(),
            expected: entry.sequence,
            found: latest,
        });
    }
    Ok(())
}

/// In-memory version store
pub struct MemoryVersionStore {
    /// Record -> rows, ascending by sequence
    logs: RwLock<HashMap<RecordId, Vec<VersionRow>>>,
}

impl MemoryVersionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records with at least one version
    #[cfg(test)]
    async fn record_count(&self) -> usize {
        self.logs.read().await.len()
    }
}

impl Default for MemoryVersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn append(&self, record: &RecordId, entry: NewVersion) -> Result<VersionRow> {
        let mut logs = self.logs.write().await;
        let latest = logs
            .get(record)
            .and_then(|log| log.last())
            .map(|row| row.sequence)
            .unwrap_or(0);
        check_next_sequence(record, latest, &entry)?;

        let row = entry.into_row();
        logs.entry(record.clone()).or_default().push(row.clone());
        Ok(row)
    }

    async fn list(&self, record: &RecordId) -> Result<Vec<VersionRow>> {
        let logs = self.logs.read().await;
        Ok(logs.get(record).cloned().unwrap_or_default())
    }

    async fn latest(&self, record: &RecordId) -> Result<Option<VersionRow>> {
        let logs = self.logs.read().await;
        Ok(logs.get(record).and_then(|log| log.last().cloned()))
    }

    async fn update_metadata(
        &self,
        record: &RecordId,
        sequence: u64,
        update: MetadataUpdate,
    ) -> Result<VersionRow> {
        let mut logs = self.logs.write().await;
        let row = logs
            .get_mut(record)
            .and_then(|log| log.iter_mut().find(|row| row.sequence == sequence))
            .ok_or_else(|| HistoryError::VersionNotFound {
                record: record.clone(),
                sequence,
            })?;
        update.apply(row);
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(sequence: u64) -> NewVersion {
        NewVersion {
            sequence,
            changeset: Bytes::from_static(b"{}"),
            tag: None,
            created_at: Utc::now(),
            reverted_to: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let store = MemoryVersionStore::new();
        let record = RecordId::new("user-1");

        assert!(store.latest(&record).await.unwrap().is_none());
        assert!(store.list(&record).await.unwrap().is_empty());

        for sequence in 1..=3 {
            let row = store.append(&record, entry(sequence)).await.unwrap();
            assert_eq!(row.sequence, sequence);
        }

        let rows = store.list(&record).await.unwrap();
        let sequences: Vec<u64> = rows.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(store.latest(&record).await.unwrap().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_append_rejects_gaps_and_duplicates() {
        let store = MemoryVersionStore::new();
        let record = RecordId::new("user-1");
        store.append(&record, entry(1)).await.unwrap();

        let dup = store.append(&record, entry(1)).await.unwrap_err();
        assert!(matches!(
            dup,
            HistoryError::ConcurrentMutationConflict { expected: 1, found: 1, .. }
        ));

        let gap = store.append(&record, entry(3)).await.unwrap_err();
        assert!(matches!(gap, HistoryError::ConcurrentMutationConflict { .. }));

        assert_eq!(store.list(&record).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_records_are_independent() {
        let store = MemoryVersionStore::new();
        let a = RecordId::new("a");
        let b = RecordId::new("b");

        store.append(&a, entry(1)).await.unwrap();
        store.append(&a, entry(2)).await.unwrap();
        store.append(&b, entry(1)).await.unwrap();

        assert_eq!(store.list(&a).await.unwrap().len(), 2);
        assert_eq!(store.list(&b).await.unwrap().len(), 1);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let store = MemoryVersionStore::new();
        let record = RecordId::new("user-1");
        store.append(&record, entry(1)).await.unwrap();

        let row = store
            .update_metadata(&record, 1, MetadataUpdate::tag("v1"))
            .await
            .unwrap();
        assert_eq!(row.tag.as_deref(), Some("v1"));

        let missing = store
            .update_metadata(&record, 9, MetadataUpdate::tag("v9"))
            .await
            .unwrap_err();
        assert!(matches!(missing, HistoryError::VersionNotFound { sequence: 9, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_distinct_records() {
        let store = Arc::new(MemoryVersionStore::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let record = RecordId::new(format!("record-{}", i));
                for sequence in 1..=5 {
                    store.append(&record, entry(sequence)).await?;
                }
                Ok::<_, HistoryError>(())
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..10 {
            let rows = store.list(&RecordId::new(format!("record-{}", i))).await.unwrap();
            assert_eq!(rows.len(), 5);
        }
    }
}
