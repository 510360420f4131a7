//! Error types for local store operations.

use crate::id::RecordId;
use crate::record::SyncState;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the local store.
///
/// [`StoreError::NotFound`] and [`StoreError::InvalidTransition`] are usage
/// errors surfaced to the caller. Everything else is a storage failure: fatal
/// to the operation that hit it, but never to the process or to other
/// records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live record with this id.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The requested change does not follow the record lifecycle.
    #[error("record {id} is {from}: cannot {action}")]
    InvalidTransition {
        /// Record id.
        id: RecordId,
        /// Current state.
        from: SyncState,
        /// What was attempted.
        action: &'static str,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] offsync_storage::StorageError),

    /// I/O error outside the backend (lock files, renames).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The record log is structurally broken.
    #[error("record log corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the bad frame.
        offset: u64,
        /// What was wrong.
        message: String,
    },

    /// A frame failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Offset of the bad frame.
        offset: u64,
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// Another process holds the store's lock file.
    #[error("store locked by another process: {0}")]
    Locked(PathBuf),
}

impl StoreError {
    /// Returns true for I/O-level failures (disk full, corruption, locking),
    /// as opposed to usage errors on a specific id.
    pub fn is_storage_failure(&self) -> bool {
        !matches!(
            self,
            StoreError::NotFound(_) | StoreError::InvalidTransition { .. }
        )
    }

    pub(crate) fn codec(err: impl std::fmt::Display) -> Self {
        StoreError::Codec(err.to_string())
    }
}
