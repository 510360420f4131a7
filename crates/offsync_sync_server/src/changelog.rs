//! Authoritative record map and change log.

use crate::error::{ServerError, ServerResult};
use offsync_core::{Cursor, LocalClock, RecordId, RemoteVersion};
use offsync_protocol::{ChangesPage, DeleteAck, PushAck, PushRequest, RemoteRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Result of a push against the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDecision {
    /// The push was applied (or was already the current content).
    Accepted(PushAck),
    /// The push was based on a stale version; carries the current record.
    Rejected(RemoteRecord),
}

struct Entry {
    record: RemoteRecord,
    /// Sequence number of the change that produced `record`.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    records: HashMap<RecordId, Entry>,
    /// `(seq, id)` in commit order. Entries superseded by a later change to
    /// the same id stay in place and are skipped when reading.
    changes: Vec<(u64, RecordId)>,
    head: u64,
}

impl Inner {
    fn commit(&mut self, mut record: RemoteRecord) -> RemoteRecord {
        self.head += 1;
        let seq = self.head;
        record.version = RemoteVersion::new(format!("v{seq}"));
        self.changes.push((seq, record.id));
        self.records.insert(
            record.id,
            Entry {
                record: record.clone(),
                seq,
            },
        );
        record
    }

    fn is_latest(&self, seq: u64, id: &RecordId) -> bool {
        self.records.get(id).is_some_and(|e| e.seq == seq)
    }
}

/// The remote store's state.
///
/// Holds the latest version of every record (tombstones included) and the
/// ordered log of changes used to serve incremental fetches.
pub struct ChangeLog {
    inner: RwLock<Inner>,
    clock: LocalClock,
}

impl ChangeLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::with_clock(LocalClock::default())
    }

    /// Creates an empty log that stamps server-side writes with `clock`.
    pub fn with_clock(clock: LocalClock) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Applies a client push with optimistic concurrency.
    pub fn push(&self, request: PushRequest) -> PushDecision {
        let mut inner = self.inner.write();

        if let Some(current) = inner.records.get(&request.id).map(|e| &e.record) {
            if request.base_version.as_ref() != Some(&current.version) {
                debug!(id = %request.id, current = %current.version, "push rejected: stale base");
                return PushDecision::Rejected(current.clone());
            }
            if !current.deleted && current.payload == request.payload {
                return PushDecision::Accepted(PushAck {
                    id: request.id,
                    version: current.version.clone(),
                });
            }
        }

        let committed = inner.commit(RemoteRecord {
            id: request.id,
            payload: request.payload,
            version: RemoteVersion::new(""),
            updated_at: request.updated_at,
            deleted: false,
        });
        debug!(id = %committed.id, version = %committed.version, "push accepted");
        PushDecision::Accepted(PushAck {
            id: committed.id,
            version: committed.version,
        })
    }

    /// Deletes a record, leaving a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] if the record is unknown or already
    /// deleted.
    pub fn delete(&self, id: &RecordId) -> ServerResult<DeleteAck> {
        let mut inner = self.inner.write();
        match inner.records.get(id) {
            Some(entry) if !entry.record.deleted => {}
            _ => return Err(ServerError::NotFound(*id)),
        }

        let tombstone = inner.commit(RemoteRecord {
            id: *id,
            payload: Vec::new(),
            version: RemoteVersion::new(""),
            updated_at: self.clock.now(),
            deleted: true,
        });
        debug!(id = %id, version = %tombstone.version, "record deleted");
        Ok(DeleteAck { id: *id })
    }

    /// Returns the latest state of records changed after `cursor`.
    ///
    /// A record changed several times after `cursor` appears once, at the
    /// position of its latest change. A `limit` of zero is treated as one, so
    /// every page makes progress.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidCursor`] if the cursor is not a
    /// sequence number issued by this log.
    pub fn changes_since(&self, cursor: &Cursor, limit: u32) -> ServerResult<ChangesPage> {
        let inner = self.inner.read();
        let after = parse_cursor(cursor)?;
        if after > inner.head {
            return Err(ServerError::InvalidCursor(cursor.as_str().to_string()));
        }

        let start = inner.changes.partition_point(|(seq, _)| *seq <= after);
        let mut live = inner.changes[start..]
            .iter()
            .filter(|(seq, id)| inner.is_latest(*seq, id));

        let mut records = Vec::new();
        let mut last_seq = after;
        for (seq, id) in live.by_ref().take(limit.max(1) as usize) {
            if let Some(entry) = inner.records.get(id) {
                records.push(entry.record.clone());
                last_seq = *seq;
            }
        }
        let has_more = live.next().is_some();
        if !has_more {
            last_seq = inner.head;
        }

        Ok(ChangesPage {
            records,
            next_cursor: Cursor::new(last_seq.to_string()),
            has_more,
        })
    }

    /// Writes a record directly, as another client would.
    ///
    /// Skips the version check; used to seed data and to simulate concurrent
    /// remote edits.
    pub fn put(&self, id: RecordId, payload: Vec<u8>) -> RemoteRecord {
        let updated_at = self.clock.now();
        self.inner.write().commit(RemoteRecord {
            id,
            payload,
            version: RemoteVersion::new(""),
            updated_at,
            deleted: false,
        })
    }

    /// Returns the current state of a record, tombstones included.
    pub fn get(&self, id: &RecordId) -> Option<RemoteRecord> {
        self.inner.read().records.get(id).map(|e| e.record.clone())
    }

    /// Cursor pointing after the latest change.
    pub fn head(&self) -> Cursor {
        Cursor::new(self.inner.read().head.to_string())
    }

    /// Number of changes ever committed.
    pub fn change_count(&self) -> usize {
        self.inner.read().changes.len()
    }

    /// Number of records that are not deleted.
    pub fn live_count(&self) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|e| !e.record.deleted)
            .count()
    }
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_cursor(cursor: &Cursor) -> ServerResult<u64> {
    if cursor.is_origin() {
        return Ok(0);
    }
    cursor
        .as_str()
        .parse()
        .map_err(|_| ServerError::InvalidCursor(cursor.as_str().to_string()))
}
