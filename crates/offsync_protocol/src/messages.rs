//! Protocol messages.

use crate::codec;
use crate::error::ProtocolResult;
use offsync_core::{Cursor, Record, RecordId, RemoteVersion, Timestamp};
use serde::{Deserialize, Serialize};

/// The authoritative state of one record at the remote store.
///
/// A deleted record is reported as a tombstone with an empty payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Record id.
    pub id: RecordId,
    /// Content at `version`.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Version tag.
    pub version: RemoteVersion,
    /// When the content was written, as stamped by the writer.
    pub updated_at: Timestamp,
    /// True if the record was deleted.
    pub deleted: bool,
}

impl RemoteRecord {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        codec::decode(bytes)
    }
}

/// Create or update a record.
///
/// `base_version` is the version the client's edit started from; the remote
/// rejects the push if it is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Record id.
    pub id: RecordId,
    /// New content.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Version the edit is based on; `None` for a record never synced.
    pub base_version: Option<RemoteVersion>,
    /// Client write time.
    pub updated_at: Timestamp,
}

impl PushRequest {
    /// Builds a push for the current content of a local record.
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id,
            payload: record.payload.clone(),
            base_version: record.remote_version.clone(),
            updated_at: record.updated_at,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        codec::decode(bytes)
    }
}

/// The remote accepted a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Record id.
    pub id: RecordId,
    /// Version assigned to the pushed content.
    pub version: RemoteVersion,
}

impl PushAck {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        codec::decode(bytes)
    }
}

/// The remote removed a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAck {
    /// Record id.
    pub id: RecordId,
}

impl DeleteAck {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        codec::decode(bytes)
    }
}

/// One page of the "changes since" feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Latest state of each record changed after the request cursor.
    pub records: Vec<RemoteRecord>,
    /// Cursor to ask for the next page with.
    pub next_cursor: Cursor,
    /// True if more changes follow `next_cursor`.
    pub has_more: bool,
}

impl ChangesPage {
    /// An empty, final page.
    pub fn empty(cursor: Cursor) -> Self {
        Self {
            records: Vec::new(),
            next_cursor: cursor,
            has_more: false,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        codec::encode(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        codec::decode(bytes)
    }
}
