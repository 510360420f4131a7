//! Persistence adapters for records and the sync cursor.
//!
//! A [`RecordStore`] only loads and saves; it applies no lifecycle rules.
//! Those live in [`LocalStore`](crate::LocalStore), which is the only
//! writer in a running replica.

mod log;
mod memory;

pub use log::{CompactionStats, LogRecordStore};
pub use memory::MemoryRecordStore;

use crate::error::StoreResult;
use crate::id::RecordId;
use crate::record::{Cursor, Record, SyncState};

/// Durable home for records and the download cursor.
///
/// Implementations must be safe to call from several threads. Each call is
/// atomic: after a failed `save`, `load` returns whatever was there before.
pub trait RecordStore: Send + Sync {
    /// Loads one record.
    fn load(&self, id: &RecordId) -> StoreResult<Option<Record>>;

    /// Inserts or replaces a record.
    fn save(&self, record: &Record) -> StoreResult<()>;

    /// Removes a record. Removing a missing id is not an error.
    fn remove(&self, id: &RecordId) -> StoreResult<()>;

    /// Returns every stored record, in no particular order.
    fn scan(&self) -> StoreResult<Vec<Record>>;

    /// Returns records in the given state.
    fn scan_state(&self, state: SyncState) -> StoreResult<Vec<Record>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|r| r.sync_state == state)
            .collect())
    }

    /// Returns the last committed download cursor.
    fn cursor(&self) -> StoreResult<Cursor>;

    /// Commits a new download cursor.
    fn set_cursor(&self, cursor: &Cursor) -> StoreResult<()>;

    /// Forces pending writes to durable storage.
    fn flush(&self) -> StoreResult<()>;
}
