//! History engine
//!
//! Ties the pieces together for hosts:
//! - capture mutations as versions (`record_mutation`, `update_attributes`)
//! - query a consistent snapshot (`versions`, `state_at`, `attributes_at`)
//! - roll a record back (`revert_to`)
//!
//! Every record gets its own async `RwLock`. Writers (appends, reverts,
//! metadata corrections) hold it exclusively; readers share it, so a query
//! never sees half of a revert. Different records never contend.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, warn};

use crate::attributes::{AttributeMap, AttributeValue, RecordId, VersionedRecord};
use crate::changeset::{Changeset, ChangesetCodec};
use crate::clock::{Clock, SystemClock};
use crate::config::{HistoryConfig, StoreBackend};
use crate::error::{HistoryError, Result};
use crate::locator::Locator;
use crate::replay;
use crate::sqlite_store::SqliteVersionStore;
use crate::store::{MemoryVersionStore, VersionStore};
use crate::version::{MetadataUpdate, NewVersion, Version};
use crate::versions::{TimeRule, Versions};

/// Version history engine over a [`VersionStore`]
pub struct History {
    store: Arc<dyn VersionStore>,
    codec: ChangesetCodec,
    clock: Arc<dyn Clock>,
    /// Record -> single-writer lock, present only while held or awaited
    locks: LockTable,
}

type LockTable = Mutex<HashMap<RecordId, Arc<RwLock<()>>>>;

fn lock_table(locks: &LockTable) -> MutexGuard<'_, HashMap<RecordId, Arc<RwLock<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds a record lock; drops the record's table entry once nobody else uses it.
///
/// The guard slot is filled after the lock is acquired, so a caller that is
/// cancelled while waiting still cleans up.
struct RecordGuard<'a, G> {
    guard: Option<G>,
    record: RecordId,
    lock: Arc<RwLock<()>>,
    locks: &'a LockTable,
}

impl<G> Drop for RecordGuard<'_, G> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = lock_table(self.locks);
        // Table entry plus ours: no holder or waiter is left
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.record);
        }
    }
}

/// A change ready to be written: everything that can fail on encoding has already run
struct PendingVersion {
    before: AttributeMap,
    after: AttributeMap,
    changeset: Changeset,
    entry: NewVersion,
}

impl History {
    /// Create an engine over an existing store
    pub fn new(store: Arc<dyn VersionStore>) -> Self {
        Self {
            store,
            codec: ChangesetCodec::default(),
            clock: Arc::new(SystemClock),
            locks: LockTable::default(),
        }
    }

    /// Create an engine from configuration
    pub fn open(config: &HistoryConfig) -> Result<Self> {
        let store: Arc<dyn VersionStore> = match &config.store {
            StoreBackend::Memory => Arc::new(MemoryVersionStore::new()),
            StoreBackend::Sqlite { path } => Arc::new(SqliteVersionStore::open(path)?),
        };
        info!(
            "History engine ready ({:?} store, {:?} compression)",
            config.store, config.compression
        );
        Ok(Self::new(store).with_codec(config.codec()))
    }

    pub fn with_codec(mut self, codec: ChangesetCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    pub fn codec(&self) -> &ChangesetCodec {
        &self.codec
    }

    fn lock_for<G>(&self, record: &RecordId) -> RecordGuard<'_, G> {
        let lock = lock_table(&self.locks)
            .entry(record.clone())
            .or_default()
            .clone();
        RecordGuard {
            guard: None,
            record: record.clone(),
            lock,
            locks: &self.locks,
        }
    }

    async fn write_lock(&self, record: &RecordId) -> RecordGuard<'_, OwnedRwLockWriteGuard<()>> {
        let mut held = self.lock_for(record);
        held.guard = Some(held.lock.clone().write_owned().await);
        held
    }

    async fn read_lock(&self, record: &RecordId) -> RecordGuard<'_, OwnedRwLockReadGuard<()>> {
        let mut held = self.lock_for(record);
        held.guard = Some(held.lock.clone().read_owned().await);
        held
    }

    /// Decode the record's versions. Caller holds the record lock.
    async fn load(&self, record: &RecordId) -> Result<Versions> {
        let rows = self.store.list(record).await?;
        let versions = rows
            .iter()
            .map(|row| Version::from_row(record.clone(), row, &self.codec))
            .collect::<Result<Vec<_>>>()?;
        Ok(Versions::new(record.clone(), versions))
    }

    async fn next_sequence(&self, record: &RecordId) -> Result<u64> {
        let latest = self.store.latest(record).await?;
        Ok(latest.map(|row| row.sequence).unwrap_or(0) + 1)
    }

    fn prepare(
        &self,
        sequence: u64,
        before: AttributeMap,
        after: AttributeMap,
        tag: Option<&str>,
        reverted_to: Option<u64>,
    ) -> Result<PendingVersion> {
        let changeset = Changeset::between(&before, &after);
        let blob = self.codec.encode(&changeset)?;
        Ok(PendingVersion {
            before,
            after,
            changeset,
            entry: NewVersion {
                sequence,
                changeset: blob,
                tag: tag.map(str::to_string),
                created_at: self.clock.now(),
                reverted_to,
            },
        })
    }

    async fn append(&self, record: &RecordId, pending: PendingVersion) -> Result<Version> {
        let row = self.store.append(record, pending.entry).await?;
        debug!(
            "Appended version {} for record {} ({} attributes changed)",
            row.sequence,
            record,
            pending.changeset.len()
        );
        Ok(Version {
            record_id: record.clone(),
            sequence: row.sequence,
            changeset: pending.changeset,
            tag: row.tag,
            created_at: row.created_at,
            reverted_to: row.reverted_to,
        })
    }

    /// Write the new state to the host record, then append the version.
    ///
    /// If the append fails the record is put back to its previous state.
    async fn write_and_append<R: VersionedRecord>(
        &self,
        record: &mut R,
        pending: PendingVersion,
    ) -> Result<Version> {
        let record_id = record.record_id().clone();
        let before = pending.before.clone();
        record
            .write_attributes(pending.after.clone())
            .map_err(|e| HistoryError::RecordWrite(e.to_string()))?;

        match self.append(&record_id, pending).await {
            Ok(version) => Ok(version),
            Err(e) => {
                warn!("Append failed for record {}, restoring its attributes: {}", record_id, e);
                if let Err(restore) = record.write_attributes(before) {
                    warn!("Could not restore record {}: {}", record_id, restore);
                }
                Err(e)
            }
        }
    }

    /// Record a change the host has already persisted.
    ///
    /// Returns `None` when no attribute actually changed.
    pub async fn record_mutation(
        &self,
        record: &RecordId,
        before: &AttributeMap,
        after: &AttributeMap,
        tag: Option<&str>,
    ) -> Result<Option<Version>> {
        if before == after {
            debug!("No attribute changes for record {}, no version recorded", record);
            return Ok(None);
        }

        let _guard = self.write_lock(record).await;
        let sequence = self.next_sequence(record).await?;
        let pending = self.prepare(sequence, before.clone(), after.clone(), tag, None)?;
        self.append(record, pending).await.map(Some)
    }

    /// Merge `changes` into the record, write it, and record the mutation.
    pub async fn update_attributes<R: VersionedRecord>(
        &self,
        record: &mut R,
        changes: AttributeMap,
        tag: Option<&str>,
    ) -> Result<Option<Version>> {
        let record_id = record.record_id().clone();
        let _guard = self.write_lock(&record_id).await;

        let before = record.attributes();
        let mut after = before.clone();
        after.extend(changes);
        if before == after {
            debug!("No attribute changes for record {}, no version recorded", record_id);
            return Ok(None);
        }

        let sequence = self.next_sequence(&record_id).await?;
        let pending = self.prepare(sequence, before, after, tag, None)?;
        self.write_and_append(record, pending).await.map(Some)
    }

    /// Set a single attribute; see [`History::update_attributes`].
    pub async fn update_attribute<R: VersionedRecord>(
        &self,
        record: &mut R,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<Option<Version>> {
        let mut changes = AttributeMap::new();
        changes.insert(name.to_string(), value.into());
        self.update_attributes(record, changes, None).await
    }

    /// Snapshot of the record's versions, ascending
    pub async fn versions(&self, record: &RecordId) -> Result<Versions> {
        let _guard = self.read_lock(record).await;
        self.load(record).await
    }

    /// Sequence the record logically stands at.
    ///
    /// After a revert this is the restored origin, not the revert's own sequence.
    pub async fn current_position(&self, record: &RecordId) -> Result<u64> {
        let _guard = self.read_lock(record).await;
        let latest = match self.store.latest(record).await? {
            Some(row) => Some(Version::from_row(record.clone(), &row, &self.codec)?),
            None => None,
        };
        Ok(replay::effective_origin(latest.as_ref()))
    }

    /// Attributes right after version `sequence` was created
    pub async fn state_at<R: VersionedRecord>(
        &self,
        record: &R,
        sequence: u64,
    ) -> Result<Option<AttributeMap>> {
        let _guard = self.read_lock(record.record_id()).await;
        let versions = self.load(record.record_id()).await?;
        Ok(replay::state_at(&record.attributes(), versions.as_slice(), sequence))
    }

    /// Attributes at a locator, without touching the record
    pub async fn attributes_at<R: VersionedRecord>(
        &self,
        record: &R,
        locator: impl Into<Locator>,
    ) -> Result<Option<AttributeMap>> {
        let _guard = self.read_lock(record.record_id()).await;
        let versions = self.load(record.record_id()).await?;
        let Some(target) = versions.resolve(&locator.into(), TimeRule::Exact) else {
            return Ok(None);
        };
        Ok(replay::state_at(&record.attributes(), versions.as_slice(), target))
    }

    /// Attributes that differ between two points of history.
    ///
    /// Values are reported as (earlier point, later point). Unresolvable
    /// bounds give an empty map.
    pub async fn changes_between<R: VersionedRecord>(
        &self,
        record: &R,
        a: impl Into<Locator>,
        b: impl Into<Locator>,
    ) -> Result<BTreeMap<String, (AttributeValue, AttributeValue)>> {
        let _guard = self.read_lock(record.record_id()).await;
        let versions = self.load(record.record_id()).await?;
        let (Some(a), Some(b)) = (versions.iteration_at(a), versions.iteration_at(b)) else {
            return Ok(BTreeMap::new());
        };
        let (from, to) = if a <= b { (a, b) } else { (b, a) };

        let live = record.attributes();
        let (Some(from_state), Some(to_state)) = (
            replay::state_at(&live, versions.as_slice(), from),
            replay::state_at(&live, versions.as_slice(), to),
        ) else {
            return Ok(BTreeMap::new());
        };
        Ok(replay::diff_states(&from_state, &to_state))
    }

    /// Roll the record back to the state at `locator`.
    ///
    /// The rollback is recorded as a new version whose `reverted_to` is the
    /// effective origin of the target, so reverting to an earlier revert
    /// records the state that revert restored. Fails without side effects
    /// when the locator does not resolve or the change cannot be encoded.
    pub async fn revert_to<R: VersionedRecord>(
        &self,
        record: &mut R,
        locator: impl Into<Locator>,
    ) -> Result<Version> {
        let locator = locator.into();
        let record_id = record.record_id().clone();
        let _guard = self.write_lock(&record_id).await;

        let versions = self.load(&record_id).await?;
        let unresolvable = || HistoryError::UnresolvableLocator {
            record: record_id.clone(),
            locator: locator.to_string(),
        };
        let target = versions
            .resolve(&locator, TimeRule::Exact)
            .ok_or_else(unresolvable)?;
        let origin = versions
            .get(target)
            .map(Version::original_sequence)
            .ok_or_else(unresolvable)?;

        let live = record.attributes();
        let restored =
            replay::state_at(&live, versions.as_slice(), target).ok_or_else(unresolvable)?;

        let sequence = versions.last().map(|v| v.sequence).unwrap_or(0) + 1;
        let pending = self.prepare(sequence, live, restored, None, Some(origin))?;
        let version = self.write_and_append(record, pending).await?;

        info!(
            "Reverted record {} to version {} (origin {}) as version {}",
            record_id, target, origin, version.sequence
        );
        Ok(version)
    }

    /// Tag the record's latest version; `None` if it has no history yet
    pub async fn tag_version(&self, record: &RecordId, tag: &str) -> Result<Option<Version>> {
        let _guard = self.write_lock(record).await;
        let Some(latest) = self.store.latest(record).await? else {
            return Ok(None);
        };
        let row = self
            .store
            .update_metadata(record, latest.sequence, MetadataUpdate::tag(tag))
            .await?;
        debug!("Tagged version {} of record {} as '{}'", row.sequence, record, tag);
        Version::from_row(record.clone(), &row, &self.codec).map(Some)
    }

    /// Override the creation time of an existing version
    pub async fn backdate(
        &self,
        record: &RecordId,
        sequence: u64,
        created_at: DateTime<Utc>,
    ) -> Result<Version> {
        let _guard = self.write_lock(record).await;
        let row = self
            .store
            .update_metadata(record, sequence, MetadataUpdate::created_at(created_at))
            .await?;
        debug!(
            "Backdated version {} of record {} to {}",
            sequence,
            record,
            created_at.to_rfc3339()
        );
        Version::from_row(record.clone(), &row, &self.codec)
    }
}
