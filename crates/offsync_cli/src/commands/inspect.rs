//! Inspect command implementation.

use super::{format_size, open_log};
use offsync_core::{RecordStore, SyncState};
use serde::Serialize;
use std::path::Path;

/// Record log inspection result.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// Log path.
    pub path: String,
    /// Log size in bytes.
    pub size_bytes: u64,
    /// Frames in the log, live or superseded.
    pub frames: u64,
    /// Live records.
    pub records: usize,
    /// Records matching the remote.
    pub synced: usize,
    /// Records waiting to be pushed.
    pub pending_upload: usize,
    /// Records waiting for remote deletion.
    pub pending_deletion: usize,
    /// Saved download cursor, absent before the first completed pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl InspectResult {
    /// Frames that a compaction would drop.
    pub fn superseded_frames(&self) -> u64 {
        self.frames
            .saturating_sub(self.records as u64 + u64::from(self.cursor.is_some()))
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects statistics for the log at `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let log = open_log(path)?;

    let mut result = InspectResult {
        path: path.display().to_string(),
        size_bytes: log.size_bytes()?,
        frames: log.frame_count(),
        ..InspectResult::default()
    };

    for record in log.scan()? {
        result.records += 1;
        match record.sync_state {
            SyncState::Synced => result.synced += 1,
            SyncState::PendingUpload => result.pending_upload += 1,
            SyncState::PendingDeletion => result.pending_deletion += 1,
            SyncState::Conflicted => {}
        }
    }

    let cursor = log.cursor()?;
    if !cursor.is_origin() {
        result.cursor = Some(cursor.as_str().to_string());
    }

    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("Record Log: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Size:       {}", format_size(result.size_bytes));
    println!("  Frames:     {}", result.frames);
    println!("  Superseded: {}", result.superseded_frames());
    println!();
    println!("Records:");
    println!("  Total:            {}", result.records);
    println!("  Synced:           {}", result.synced);
    println!("  Pending upload:   {}", result.pending_upload);
    println!("  Pending deletion: {}", result.pending_deletion);
    println!();
    match &result.cursor {
        Some(cursor) => println!("Cursor: {cursor}"),
        None => println!("Cursor: (never synced)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{LocalStore, RemoteVersion, StoreConfig};

    #[test]
    fn counts_states_and_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.log");
        {
            let store = LocalStore::open_file(&path, &StoreConfig::default()).unwrap();
            let a = store.create(b"a".to_vec()).unwrap();
            let b = store.create(b"b".to_vec()).unwrap();
            store.create(b"c".to_vec()).unwrap();
            store.mark_synced(&a.id, RemoteVersion::new("1")).unwrap();
            store.mark_synced(&b.id, RemoteVersion::new("1")).unwrap();
            store.delete(&b.id).unwrap();
            store
                .set_cursor(&offsync_core::Cursor::new("seq-9"))
                .unwrap();
        }

        let result = inspect(&path).unwrap();
        assert_eq!(result.records, 3);
        assert_eq!(result.synced, 1);
        assert_eq!(result.pending_upload, 1);
        assert_eq!(result.pending_deletion, 1);
        assert_eq!(result.cursor.as_deref(), Some("seq-9"));
        assert!(result.superseded_frames() > 0);
    }
}
