//! The sync server.

use crate::changelog::{ChangeLog, PushDecision};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::RequestHandler;
use offsync_core::{Cursor, RecordId};
use offsync_protocol::{ChangesPage, DeleteAck, HttpRequest, HttpResponse, PushRequest, RemoteRecord};
use std::sync::Arc;

/// The reference remote store.
///
/// ```
/// use offsync_core::{RecordId, Timestamp};
/// use offsync_protocol::{HttpRequest, PushRequest};
/// use offsync_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let push = PushRequest {
///     id: RecordId::new(),
///     payload: b"hello".to_vec(),
///     base_version: None,
///     updated_at: Timestamp::from_millis(1),
/// };
/// let response = server.handle_http(&HttpRequest::push(&push).unwrap());
/// assert_eq!(response.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    log: Arc<ChangeLog>,
}

impl SyncServer {
    /// Creates a server with an empty change log.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_log(config, Arc::new(ChangeLog::new()))
    }

    /// Creates a server over an existing change log.
    pub fn with_log(config: ServerConfig, log: Arc<ChangeLog>) -> Self {
        let handler = RequestHandler::new(config, Arc::clone(&log));
        Self { handler, log }
    }

    /// Handles an HTTP request.
    pub fn handle_http(&self, request: &HttpRequest) -> HttpResponse {
        self.handler.handle(request)
    }

    /// Handles a push.
    pub fn handle_push(&self, request: PushRequest) -> PushDecision {
        self.log.push(request)
    }

    /// Handles a delete.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is unknown or already deleted.
    pub fn handle_delete(&self, id: &RecordId) -> ServerResult<DeleteAck> {
        self.log.delete(id)
    }

    /// Handles a changes fetch.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCursor` for a cursor this server did not issue.
    pub fn handle_changes(&self, cursor: &Cursor, limit: u32) -> ServerResult<ChangesPage> {
        self.log.changes_since(cursor, limit)
    }

    /// Writes a record as another client would, bypassing version checks.
    pub fn put(&self, id: RecordId, payload: impl Into<Vec<u8>>) -> RemoteRecord {
        self.log.put(id, payload.into())
    }

    /// Returns the current remote state of a record.
    pub fn get(&self, id: &RecordId) -> Option<RemoteRecord> {
        self.log.get(id)
    }

    /// Returns the change log.
    pub fn log(&self) -> &Arc<ChangeLog> {
        &self.log
    }

    /// Cursor after the latest change.
    pub fn head(&self) -> Cursor {
        self.log.head()
    }
}
