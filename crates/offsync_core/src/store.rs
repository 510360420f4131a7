//! The local store facade.

use crate::clock::{LocalClock, Timestamp};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::feed::{ChangeFeed, RecordChange};
use crate::id::RecordId;
use crate::lock::LockTable;
use crate::record::{Cursor, Record, RemoteVersion, SyncState};
use crate::record_store::{LogRecordStore, MemoryRecordStore, RecordStore};
use parking_lot::MutexGuard;
use std::fmt;
use std::path::Path;
use std::sync::mpsc::Receiver;

/// Number of records in each persisted state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    /// Records in [`SyncState::Synced`].
    pub synced: usize,
    /// Records in [`SyncState::PendingUpload`].
    pub pending_upload: usize,
    /// Records in [`SyncState::PendingDeletion`].
    pub pending_deletion: usize,
}

impl StateCounts {
    /// Records with local changes not yet on the remote.
    pub fn dirty(&self) -> usize {
        self.pending_upload + self.pending_deletion
    }

    /// All stored records.
    pub fn total(&self) -> usize {
        self.synced + self.dirty()
    }
}

/// The application's view of local data.
///
/// Every read and write is local and returns without touching the network.
/// Writes to one record are serialized through a striped lock table; the
/// sync engine takes the same lock (see [`LocalStore::lock`]) while it
/// re-reads and rewrites a record, so an application edit can never be lost
/// between the engine's read and its write.
///
/// ```
/// use offsync_core::{LocalStore, SyncState};
///
/// let store = LocalStore::in_memory();
/// let record = store.create(b"draft".to_vec()).unwrap();
/// assert_eq!(record.sync_state, SyncState::PendingUpload);
///
/// store.delete(&record.id).unwrap();
/// assert_eq!(store.get(&record.id).unwrap().sync_state, SyncState::PendingDeletion);
/// ```
pub struct LocalStore {
    records: Box<dyn RecordStore>,
    locks: LockTable,
    clock: LocalClock,
    feed: ChangeFeed,
}

impl LocalStore {
    /// Wraps a record store with the default configuration.
    pub fn new(records: impl RecordStore + 'static) -> Self {
        Self::with_config(records, &StoreConfig::default())
    }

    /// Wraps a record store.
    pub fn with_config(records: impl RecordStore + 'static, config: &StoreConfig) -> Self {
        Self {
            records: Box::new(records),
            locks: LockTable::new(config.lock_stripes),
            clock: LocalClock::default(),
            feed: ChangeFeed::new(),
        }
    }

    /// A store that keeps everything in memory.
    pub fn in_memory() -> Self {
        Self::new(MemoryRecordStore::new())
    }

    /// Opens a durable store backed by a record log file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process has the file open,
    /// or a storage error if the log cannot be read.
    pub fn open_file(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        let log = LogRecordStore::open_file(path, config)?;
        Ok(Self::with_config(log, config))
    }

    /// Replaces the clock used to stamp local writes.
    #[must_use]
    pub fn with_clock(mut self, clock: LocalClock) -> Self {
        self.clock = clock;
        self
    }

    /// Creates a new record with a fresh id, pending upload.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn create(&self, payload: impl Into<Vec<u8>>) -> StoreResult<Record> {
        let id = RecordId::new();
        self.lock(&id).write_local(payload.into(), true)
    }

    /// Replaces the payload of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record is absent or deleted.
    pub fn update(&self, id: &RecordId, payload: impl Into<Vec<u8>>) -> StoreResult<Record> {
        self.lock(id).update(payload)
    }

    /// Inserts or replaces a record by id and marks it pending upload.
    ///
    /// Only the id and payload of `record` are taken; the timestamp, state
    /// and remote version are managed by the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id belongs to a deleted record.
    pub fn put(&self, record: Record) -> StoreResult<Record> {
        self.lock(&record.id).write_local(record.payload, true)
    }

    /// Returns a record, including one pending deletion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is unknown.
    pub fn get(&self, id: &RecordId) -> StoreResult<Record> {
        self.find(id)?.ok_or(StoreError::NotFound(*id))
    }

    /// Returns a record if it exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn find(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        self.records.load(id)
    }

    /// Marks a record for deletion.
    ///
    /// The record stays readable as [`SyncState::PendingDeletion`] until the
    /// remote confirms the deletion.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is unknown.
    pub fn delete(&self, id: &RecordId) -> StoreResult<Record> {
        self.lock(id).delete()
    }

    /// Returns every record in `state`, oldest write first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the scan fails.
    pub fn list_by_sync_state(&self, state: SyncState) -> StoreResult<Vec<Record>> {
        let mut records = self.records.scan_state(state)?;
        records.sort_by_key(|r| (r.updated_at, r.id));
        Ok(records)
    }

    /// Returns every stored record, oldest write first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the scan fails.
    pub fn list(&self) -> StoreResult<Vec<Record>> {
        let mut records = self.records.scan()?;
        records.sort_by_key(|r| (r.updated_at, r.id));
        Ok(records)
    }

    /// Counts records per state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the scan fails.
    pub fn counts_by_state(&self) -> StoreResult<StateCounts> {
        let mut counts = StateCounts::default();
        for record in self.records.scan()? {
            match record.sync_state {
                SyncState::Synced => counts.synced += 1,
                SyncState::PendingUpload => counts.pending_upload += 1,
                SyncState::PendingDeletion => counts.pending_deletion += 1,
                SyncState::Conflicted => {}
            }
        }
        Ok(counts)
    }

    /// Number of records waiting to be pushed or deleted remotely.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the scan fails.
    pub fn dirty_count(&self) -> StoreResult<usize> {
        Ok(self.counts_by_state()?.dirty())
    }

    /// Records a successful push.
    ///
    /// # Errors
    ///
    /// See [`RecordGuard::mark_synced`].
    pub fn mark_synced(&self, id: &RecordId, version: RemoteVersion) -> StoreResult<Record> {
        self.lock(id).mark_synced(version)
    }

    /// Removes a record whose deletion the remote has confirmed.
    ///
    /// # Errors
    ///
    /// See [`RecordGuard::purge`].
    pub fn purge(&self, id: &RecordId) -> StoreResult<()> {
        self.lock(id).purge()
    }

    /// Writes a fetched remote record locally as synced.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn apply_remote(
        &self,
        id: &RecordId,
        payload: Vec<u8>,
        version: RemoteVersion,
        updated_at: Timestamp,
    ) -> StoreResult<Record> {
        self.lock(id).apply_remote(payload, version, updated_at)
    }

    /// Keeps local changes dirty against a newer remote version.
    ///
    /// # Errors
    ///
    /// See [`RecordGuard::rebase`].
    pub fn rebase(&self, id: &RecordId, version: RemoteVersion) -> StoreResult<Record> {
        self.lock(id).rebase(version)
    }

    /// Takes the lock for one record.
    ///
    /// The guard must not be held across an `.await`, and the same id must
    /// not be locked again while it is held.
    pub fn lock(&self, id: &RecordId) -> RecordGuard<'_> {
        RecordGuard {
            store: self,
            id: *id,
            _lock: self.locks.lock(id),
        }
    }

    /// Returns the last committed download cursor.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn cursor(&self) -> StoreResult<Cursor> {
        self.records.cursor()
    }

    /// Commits a new download cursor.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn set_cursor(&self, cursor: &Cursor) -> StoreResult<()> {
        self.records.set_cursor(cursor)
    }

    /// Forces all writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the flush fails.
    pub fn flush(&self) -> StoreResult<()> {
        self.records.flush()
    }

    /// Returns the current state of every record and a receiver for later
    /// changes.
    ///
    /// A change racing with the snapshot may show up in both; consumers
    /// should treat events as "latest state wins".
    ///
    /// # Errors
    ///
    /// Returns a storage error if the snapshot scan fails.
    pub fn subscribe(&self) -> StoreResult<(Vec<RecordChange>, Receiver<RecordChange>)> {
        let rx = self.feed.subscribe();
        let snapshot = self
            .records
            .scan()?
            .into_iter()
            .map(|r| RecordChange::state(r.id, r.sync_state))
            .collect();
        Ok((snapshot, rx))
    }

    fn write(&self, previous: Option<SyncState>, record: &Record) -> StoreResult<()> {
        if record.sync_state == SyncState::Conflicted {
            return Err(StoreError::InvalidTransition {
                id: record.id,
                from: SyncState::Conflicted,
                action: "persist",
            });
        }
        self.records.save(record)?;
        if previous != Some(record.sync_state) {
            self.feed
                .emit(RecordChange::state(record.id, record.sync_state));
        }
        Ok(())
    }

    fn remove(&self, id: &RecordId) -> StoreResult<()> {
        self.records.remove(id)?;
        self.feed.emit(RecordChange::purged(*id));
        Ok(())
    }
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStore")
            .field("lock_stripes", &self.locks.len())
            .field("clock", &self.clock)
            .field("feed", &self.feed)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to one record.
///
/// Every method re-reads the record under the lock, so decisions are made
/// against the current local state rather than a snapshot taken earlier.
pub struct RecordGuard<'a> {
    store: &'a LocalStore,
    id: RecordId,
    _lock: MutexGuard<'a, ()>,
}

impl RecordGuard<'_> {
    /// The locked id.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Returns the record if it exists.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the read fails.
    pub fn find(&self) -> StoreResult<Option<Record>> {
        self.store.records.load(&self.id)
    }

    /// Returns the record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if it does not exist.
    pub fn get(&self) -> StoreResult<Record> {
        self.find()?.ok_or(StoreError::NotFound(self.id))
    }

    /// Replaces the payload of an existing record. See [`LocalStore::update`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record is absent or deleted.
    pub fn update(&self, payload: impl Into<Vec<u8>>) -> StoreResult<Record> {
        self.write_local(payload.into(), false)
    }

    /// Marks the record for deletion. See [`LocalStore::delete`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub fn delete(&self) -> StoreResult<Record> {
        let mut record = self.get()?;
        if record.sync_state == SyncState::PendingDeletion {
            return Ok(record);
        }
        let previous = record.sync_state;
        record.sync_state = SyncState::PendingDeletion;
        record.updated_at = self.store.clock.now();
        self.store.write(Some(previous), &record)?;
        Ok(record)
    }

    /// Records that the remote accepted the current content at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the record is pending
    /// deletion, or [`StoreError::NotFound`].
    pub fn mark_synced(&self, version: RemoteVersion) -> StoreResult<Record> {
        let mut record = self.get()?;
        if record.sync_state == SyncState::PendingDeletion {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: record.sync_state,
                action: "mark synced",
            });
        }
        let previous = record.sync_state;
        record.sync_state = SyncState::Synced;
        record.remote_version = Some(version);
        self.store.write(Some(previous), &record)?;
        Ok(record)
    }

    /// Removes a record whose remote deletion was confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] unless the record is
    /// pending deletion, or [`StoreError::NotFound`].
    pub fn purge(&self) -> StoreResult<()> {
        let record = self.get()?;
        if record.sync_state != SyncState::PendingDeletion {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: record.sync_state,
                action: "purge",
            });
        }
        self.store.remove(&self.id)
    }

    /// Writes remote content over whatever is stored, as synced.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn apply_remote(
        &self,
        payload: Vec<u8>,
        version: RemoteVersion,
        updated_at: Timestamp,
    ) -> StoreResult<Record> {
        let previous = self.find()?.map(|r| r.sync_state);
        let record = Record {
            id: self.id,
            payload,
            updated_at,
            remote_version: Some(version),
            sync_state: SyncState::Synced,
        };
        self.store.clock.observe(updated_at);
        self.store.write(previous, &record)?;
        Ok(record)
    }

    /// Drops the local record because the remote deleted it.
    ///
    /// Unlike [`purge`](Self::purge) this ignores the local state.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the removal fails.
    pub fn apply_remote_deletion(&self) -> StoreResult<()> {
        if self.find()?.is_none() {
            return Ok(());
        }
        self.store.remove(&self.id)
    }

    /// Moves the record's base to `version` while keeping local changes
    /// dirty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the record is synced, or
    /// [`StoreError::NotFound`].
    pub fn rebase(&self, version: RemoteVersion) -> StoreResult<Record> {
        let mut record = self.get()?;
        if !record.sync_state.is_dirty() {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: record.sync_state,
                action: "rebase",
            });
        }
        record.remote_version = Some(version);
        self.store.write(Some(record.sync_state), &record)?;
        Ok(record)
    }

    /// Replaces the record with merged content based on `version`, pending
    /// upload.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn replace_dirty(&self, payload: Vec<u8>, version: RemoteVersion) -> StoreResult<Record> {
        let previous = self.find()?.map(|r| r.sync_state);
        let record = Record {
            id: self.id,
            payload,
            updated_at: self.store.clock.now(),
            remote_version: Some(version),
            sync_state: SyncState::PendingUpload,
        };
        self.store.write(previous, &record)?;
        Ok(record)
    }

    fn write_local(&self, payload: Vec<u8>, create: bool) -> StoreResult<Record> {
        let existing = self.find()?;
        let (previous, remote_version) = match existing {
            Some(r) if r.sync_state == SyncState::PendingDeletion => {
                return Err(StoreError::NotFound(self.id));
            }
            Some(r) => (Some(r.sync_state), r.remote_version),
            None if create => (None, None),
            None => return Err(StoreError::NotFound(self.id)),
        };

        let record = Record {
            id: self.id,
            payload,
            updated_at: self.store.clock.now(),
            remote_version,
            sync_state: SyncState::PendingUpload,
        };
        self.store.write(previous, &record)?;
        Ok(record)
    }
}

impl fmt::Debug for RecordGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> LocalStore {
        LocalStore::in_memory().with_clock(LocalClock::new(ManualClock::new(1_000)))
    }

    fn v(tag: &str) -> RemoteVersion {
        RemoteVersion::new(tag)
    }

    #[test]
    fn create_is_pending_upload_and_stamped() {
        let store = store();
        let record = store.create(b"a".to_vec()).unwrap();
        assert_eq!(record.sync_state, SyncState::PendingUpload);
        assert_eq!(record.updated_at, Timestamp::from_millis(1_000));
        assert_eq!(store.get(&record.id).unwrap(), record);
    }

    #[test]
    fn update_moves_synced_to_pending_and_keeps_base() {
        let store = store();
        let record = store.create(b"a".to_vec()).unwrap();
        store.mark_synced(&record.id, v("v1")).unwrap();

        let updated = store.update(&record.id, b"b".to_vec()).unwrap();
        assert_eq!(updated.sync_state, SyncState::PendingUpload);
        assert_eq!(updated.remote_version, Some(v("v1")));
        assert!(updated.updated_at > record.updated_at);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = store();
        let id = RecordId::new();
        assert!(matches!(store.get(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.update(&id, vec![]), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(&id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.mark_synced(&id, v("v1")), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn put_creates_with_client_id() {
        let store = store();
        let record = Record::new(b"offline".to_vec());
        let stored = store.put(record.clone()).unwrap();
        assert_eq!(stored.id, record.id);
        assert_eq!(stored.sync_state, SyncState::PendingUpload);
        assert!(stored.is_new());
    }

    #[test]
    fn deleted_record_stays_visible_until_purged() {
        let store = store();
        let record = store.create(b"a".to_vec()).unwrap();
        store.delete(&record.id).unwrap();

        let seen = store.get(&record.id).unwrap();
        assert_eq!(seen.sync_state, SyncState::PendingDeletion);
        assert!(matches!(
            store.update(&record.id, b"b".to_vec()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.put(seen.clone()),
            Err(StoreError::NotFound(_))
        ));

        store.purge(&record.id).unwrap();
        assert!(store.find(&record.id).unwrap().is_none());
    }

    #[test]
    fn purge_requires_pending_deletion() {
        let store = store();
        let record = store.create(b"a".to_vec()).unwrap();
        assert!(matches!(
            store.purge(&record.id),
            Err(StoreError::InvalidTransition { action: "purge", .. })
        ));
    }

    #[test]
    fn mark_synced_refuses_pending_deletion() {
        let store = store();
        let record = store.create(b"a".to_vec()).unwrap();
        store.delete(&record.id).unwrap();
        assert!(matches!(
            store.mark_synced(&record.id, v("v1")),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn apply_remote_and_rebase() {
        let store = store();
        let id = RecordId::new();
        let applied = store
            .apply_remote(&id, b"remote".to_vec(), v("v3"), Timestamp::from_millis(9_000))
            .unwrap();
        assert_eq!(applied.sync_state, SyncState::Synced);

        // Local writes after a remote stamp sort after it.
        let local = store.update(&id, b"local".to_vec()).unwrap();
        assert!(local.updated_at > Timestamp::from_millis(9_000));

        let rebased = store.rebase(&id, v("v4")).unwrap();
        assert_eq!(rebased.sync_state, SyncState::PendingUpload);
        assert_eq!(rebased.payload, b"local");
        assert_eq!(rebased.remote_version, Some(v("v4")));

        store.mark_synced(&id, v("v5")).unwrap();
        assert!(matches!(
            store.rebase(&id, v("v6")),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn guard_replace_dirty_and_remote_deletion() {
        let store = store();
        let record = store.create(b"a".to_vec()).unwrap();
        {
            let guard = store.lock(&record.id);
            let merged = guard.replace_dirty(b"ab".to_vec(), v("v2")).unwrap();
            assert_eq!(merged.sync_state, SyncState::PendingUpload);
            assert_eq!(merged.remote_version, Some(v("v2")));
            guard.apply_remote_deletion().unwrap();
            guard.apply_remote_deletion().unwrap();
        }
        assert!(store.find(&record.id).unwrap().is_none());
    }

    #[test]
    fn counts_and_listing() {
        let store = store();
        let a = store.create(b"a".to_vec()).unwrap();
        let b = store.create(b"b".to_vec()).unwrap();
        let c = store.create(b"c".to_vec()).unwrap();
        store.mark_synced(&a.id, v("v1")).unwrap();
        store.delete(&c.id).unwrap();

        let counts = store.counts_by_state().unwrap();
        assert_eq!(
            counts,
            StateCounts {
                synced: 1,
                pending_upload: 1,
                pending_deletion: 1
            }
        );
        assert_eq!(store.dirty_count().unwrap(), 2);
        let pending = store.list_by_sync_state(SyncState::PendingUpload).unwrap();
        assert_eq!(pending.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn subscribe_gives_snapshot_then_changes() {
        let store = store();
        let a = store.create(b"a".to_vec()).unwrap();
        let (snapshot, rx) = store.subscribe().unwrap();
        assert_eq!(
            snapshot,
            vec![RecordChange::state(a.id, SyncState::PendingUpload)]
        );

        // Same-state rewrite emits nothing.
        store.update(&a.id, b"a2".to_vec()).unwrap();
        store.mark_synced(&a.id, v("v1")).unwrap();
        store.delete(&a.id).unwrap();
        store.purge(&a.id).unwrap();

        let states: Vec<_> = rx
            .try_iter()
            .map(|c| c.sync_state)
            .collect();
        assert_eq!(
            states,
            vec![
                Some(SyncState::Synced),
                Some(SyncState::PendingDeletion),
                None
            ]
        );
    }

    #[test]
    fn guard_blocks_concurrent_writer() {
        let store = Arc::new(store());
        let record = store.create(b"a".to_vec()).unwrap();
        let guard = store.lock(&record.id);

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.update(&record.id, b"user".to_vec()).unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(guard.get().unwrap().payload, b"a");
        guard.mark_synced(v("v1")).unwrap();
        drop(guard);

        let after = writer.join().unwrap();
        assert_eq!(after.sync_state, SyncState::PendingUpload);
        assert_eq!(after.remote_version, Some(v("v1")));
    }
}
