//! The synchronizable record and its sync marker.

use crate::clock::Timestamp;
use crate::id::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a record stands relative to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncState {
    /// Local content matches the last known remote content.
    Synced,
    /// Local content changed since the last sync and must be pushed.
    PendingUpload,
    /// Deleted locally; the deletion must reach the remote before the record
    /// is purged.
    PendingDeletion,
    /// Both sides changed. Only exists while a pass reconciles the record;
    /// never written to a store.
    Conflicted,
}

impl SyncState {
    /// States a store may hold.
    pub const PERSISTED: [SyncState; 3] = [
        SyncState::Synced,
        SyncState::PendingUpload,
        SyncState::PendingDeletion,
    ];

    /// Returns true if the record has local changes the remote has not seen.
    pub fn is_dirty(&self) -> bool {
        matches!(self, SyncState::PendingUpload | SyncState::PendingDeletion)
    }

    /// Kebab-case name, as used by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::PendingUpload => "pending-upload",
            SyncState::PendingDeletion => "pending-deletion",
            SyncState::Conflicted => "conflicted",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncState::Synced),
            "pending-upload" => Ok(SyncState::PendingUpload),
            "pending-deletion" => Ok(SyncState::PendingDeletion),
            "conflicted" => Ok(SyncState::Conflicted),
            other => Err(format!("unknown sync state: {other}")),
        }
    }
}

/// Version tag assigned by the remote store on every accepted write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteVersion(String);

impl RemoteVersion {
    /// Wraps a version tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque marker of how far remote changes have been fetched.
///
/// The default cursor means "from the beginning".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// The cursor before any change.
    pub fn origin() -> Self {
        Self::default()
    }

    /// Wraps a server-issued cursor.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the origin cursor.
    pub fn is_origin(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_origin() {
            f.write_str("<origin>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// One synchronizable domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable client-generated id.
    pub id: RecordId,
    /// Opaque content.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Set by whichever side wrote last.
    pub updated_at: Timestamp,
    /// Last version acknowledged by the remote; `None` if never synced.
    pub remote_version: Option<RemoteVersion>,
    /// Sync marker.
    pub sync_state: SyncState,
}

impl Record {
    /// A fresh, never-synced record with a new id.
    ///
    /// `updated_at` is stamped by the store when the record is written.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_id(RecordId::new(), payload)
    }

    /// A fresh, never-synced record with a caller-chosen id.
    pub fn with_id(id: RecordId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            payload: payload.into(),
            updated_at: Timestamp::default(),
            remote_version: None,
            sync_state: SyncState::PendingUpload,
        }
    }

    /// Returns true if the record has never been acknowledged remotely.
    pub fn is_new(&self) -> bool {
        self.remote_version.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_states() {
        assert!(!SyncState::Synced.is_dirty());
        assert!(SyncState::PendingUpload.is_dirty());
        assert!(SyncState::PendingDeletion.is_dirty());
        assert!(!SyncState::Conflicted.is_dirty());
    }

    #[test]
    fn state_names_parse_back() {
        for state in SyncState::PERSISTED {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!("dirty".parse::<SyncState>().is_err());
    }

    #[test]
    fn new_record_is_pending_upload() {
        let record = Record::new(b"hello".to_vec());
        assert_eq!(record.sync_state, SyncState::PendingUpload);
        assert!(record.is_new());
    }

    #[test]
    fn cursor_origin() {
        assert!(Cursor::origin().is_origin());
        assert!(!Cursor::new("42").is_origin());
        assert_eq!(Cursor::origin().to_string(), "<origin>");
    }
}
