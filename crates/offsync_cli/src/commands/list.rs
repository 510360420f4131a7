//! List command implementation.

use super::open_log;
use offsync_core::{Record, RecordStore, SyncState};
use serde::Serialize;
use std::path::Path;

/// One listed record.
#[derive(Debug, Serialize)]
pub struct RecordEntry {
    /// Record id.
    pub id: String,
    /// Sync state.
    pub state: String,
    /// Last write, milliseconds since the epoch.
    pub updated_at: u64,
    /// Last version acknowledged by the remote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,
    /// Payload size in bytes.
    pub payload_len: usize,
}

impl From<&Record> for RecordEntry {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.to_string(),
            state: record.sync_state.to_string(),
            updated_at: record.updated_at.as_millis(),
            remote_version: record.remote_version.as_ref().map(|v| v.to_string()),
            payload_len: record.payload.len(),
        }
    }
}

/// Runs the list command.
pub fn run(
    path: &Path,
    state: Option<SyncState>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = list(path, state)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            for entry in &entries {
                println!(
                    "{}  {:<16}  {:>13}  {:<12}  {} bytes",
                    entry.id,
                    entry.state,
                    entry.updated_at,
                    entry.remote_version.as_deref().unwrap_or("-"),
                    entry.payload_len
                );
            }
            println!("{} record(s)", entries.len());
        }
    }

    Ok(())
}

/// Loads the records of the log at `path`, ordered by id.
pub fn list(
    path: &Path,
    state: Option<SyncState>,
) -> Result<Vec<RecordEntry>, Box<dyn std::error::Error>> {
    let log = open_log(path)?;
    let mut records = match state {
        Some(state) => log.scan_state(state)?,
        None => log.scan()?,
    };
    records.sort_by_key(|r| r.id);
    Ok(records.iter().map(RecordEntry::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{LocalStore, StoreConfig};

    #[test]
    fn filters_by_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        let deleted = {
            let store = LocalStore::open_file(&path, &StoreConfig::default()).unwrap();
            store.create(b"keep".to_vec()).unwrap();
            let gone = store.create(b"gone".to_vec()).unwrap();
            store.delete(&gone.id).unwrap();
            gone.id
        };

        assert_eq!(list(&path, None).unwrap().len(), 2);

        let pending = list(&path, Some(SyncState::PendingDeletion)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, deleted.to_string());
        assert_eq!(pending[0].state, "pending-deletion");
        assert!(pending[0].remote_version.is_none());
    }
}
