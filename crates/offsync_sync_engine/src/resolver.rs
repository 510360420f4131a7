//! Conflict resolution policies.
//!
//! A conflict is a record changed locally (still dirty) while the remote
//! moved to a version the local copy was not based on. The resolver decides
//! which side survives; the orchestrator applies the decision under the
//! record's lock.

use offsync_core::Record;
use offsync_protocol::RemoteRecord;

/// Outcome of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Overwrite local with the remote record and mark it synced. Against a
    /// remote tombstone this removes the local record.
    KeepRemote,
    /// Keep local content pending upload, now based on the remote version.
    KeepLocal,
    /// Replace local content with this payload, pending upload on top of
    /// the remote version.
    Merge(Vec<u8>),
}

/// Decides conflicts. Must be pure: no I/O and no side effects.
pub trait ConflictResolver: Send + Sync {
    /// Resolves one conflicted record.
    fn resolve(&self, local: &Record, remote: &RemoteRecord) -> Resolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Record, &RemoteRecord) -> Resolution + Send + Sync,
{
    fn resolve(&self, local: &Record, remote: &RemoteRecord) -> Resolution {
        self(local, remote)
    }
}

/// The remote always wins. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl ConflictResolver for RemoteWins {
    fn resolve(&self, _local: &Record, _remote: &RemoteRecord) -> Resolution {
        Resolution::KeepRemote
    }
}

/// Local edits always win.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl ConflictResolver for LocalWins {
    fn resolve(&self, _local: &Record, _remote: &RemoteRecord) -> Resolution {
        Resolution::KeepLocal
    }
}

/// Newest `updated_at` wins; ties go to the remote.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictResolver for LastWriteWins {
    fn resolve(&self, local: &Record, remote: &RemoteRecord) -> Resolution {
        if local.updated_at > remote.updated_at {
            Resolution::KeepLocal
        } else {
            Resolution::KeepRemote
        }
    }
}
