use super::RecordStore;
use crate::error::StoreResult;
use crate::id::RecordId;
use crate::record::{Cursor, Record};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A record store that lives only in memory.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordId, Record>>,
    cursor: RwLock<Cursor>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn save(&self, record: &Record) -> StoreResult<()> {
        self.records.write().insert(record.id, record.clone());
        Ok(())
    }

    fn remove(&self, id: &RecordId) -> StoreResult<()> {
        self.records.write().remove(id);
        Ok(())
    }

    fn scan(&self) -> StoreResult<Vec<Record>> {
        Ok(self.records.read().values().cloned().collect())
    }

    fn cursor(&self) -> StoreResult<Cursor> {
        Ok(self.cursor.read().clone())
    }

    fn set_cursor(&self, cursor: &Cursor) -> StoreResult<()> {
        *self.cursor.write() = cursor.clone();
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
