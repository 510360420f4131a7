//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod list;

use offsync_core::{LogRecordStore, StoreConfig};
use offsync_storage::FileBackend;
use std::path::Path;
use tracing::debug;

/// Opens an existing record log, refusing to create a new one.
pub(crate) fn open_log(
    path: &Path,
) -> Result<LogRecordStore<FileBackend>, Box<dyn std::error::Error>> {
    if !path.is_file() {
        return Err(format!("No record log found at {}", path.display()).into());
    }
    debug!(path = %path.display(), "opening record log");
    Ok(LogRecordStore::open_file(path, &StoreConfig::default())?)
}

/// Formats a byte count for humans.
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.log");
        assert!(open_log(&path).is_err());
        assert!(!path.exists());
    }
}
