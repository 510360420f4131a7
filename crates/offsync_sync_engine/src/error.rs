//! Error types for the sync engine.

use crate::remote::TransportFailure;
use offsync_core::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors returned by the orchestrator's public API.
///
/// A failed pass is not an error: it is reported through the status stream
/// and the pass summary. These errors cover calls the orchestrator could not
/// serve at all.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote call failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportFailure),

    /// The orchestrator has shut down.
    #[error("sync orchestrator stopped")]
    Stopped,

    /// A worker task panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl SyncError {
    /// Returns true if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) => true,
            SyncError::Store(e) => e.is_storage_failure(),
            SyncError::Stopped | SyncError::Worker(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::RecordId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::from(TransportFailure::network("reset")).is_retryable());
        assert!(SyncError::Store(StoreError::Codec("bad".into())).is_retryable());
        assert!(!SyncError::Store(StoreError::NotFound(RecordId::new())).is_retryable());
        assert!(!SyncError::Stopped.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Stopped.to_string(), "sync orchestrator stopped");
        let err = SyncError::from(TransportFailure::network("reset"));
        assert_eq!(err.to_string(), "transport error: network failure: reset");
    }
}
