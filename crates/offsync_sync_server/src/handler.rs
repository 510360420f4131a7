//! Request handling for the HTTP routes.

use crate::changelog::{ChangeLog, PushDecision};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use offsync_protocol::{status, HttpRequest, HttpResponse, PushRequest, Route};
use std::sync::Arc;
use tracing::warn;

/// Maps HTTP requests onto a [`ChangeLog`].
pub struct RequestHandler {
    config: ServerConfig,
    log: Arc<ChangeLog>,
}

impl RequestHandler {
    /// Creates a handler over `log`.
    pub fn new(config: ServerConfig, log: Arc<ChangeLog>) -> Self {
        Self { config, log }
    }

    /// Handles one request. Never fails: errors become error responses.
    pub fn handle(&self, request: &HttpRequest) -> HttpResponse {
        match self.route(request) {
            Ok(response) => response,
            Err(err) => {
                if err.is_server_error() {
                    warn!(method = %request.method, path = %request.path, error = %err, "request failed");
                }
                HttpResponse::text(err.status(), err)
            }
        }
    }

    fn route(&self, request: &HttpRequest) -> ServerResult<HttpResponse> {
        match Route::parse(request.method, &request.path)? {
            Route::Push => {
                let push = PushRequest::decode(&request.body)?;
                match self.log.push(push) {
                    PushDecision::Accepted(ack) => Ok(HttpResponse::new(status::OK, ack.encode()?)),
                    PushDecision::Rejected(current) => {
                        Ok(HttpResponse::new(status::CONFLICT, current.encode()?))
                    }
                }
            }
            Route::Delete(id) => {
                let ack = self.log.delete(&id)?;
                Ok(HttpResponse::new(status::OK, ack.encode()?))
            }
            Route::Changes { cursor, limit } => {
                let page = self
                    .log
                    .changes_since(&cursor, self.config.page_size(limit))?;
                Ok(HttpResponse::new(status::OK, page.encode()?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{Cursor, RecordId, RemoteVersion, Timestamp};
    use offsync_protocol::{ChangesPage, DeleteAck, Method, PushAck, RemoteRecord};

    fn handler() -> (RequestHandler, Arc<ChangeLog>) {
        let log = Arc::new(ChangeLog::new());
        let config = ServerConfig::default().with_max_page_size(2);
        (RequestHandler::new(config, Arc::clone(&log)), log)
    }

    fn push(id: RecordId, base: Option<RemoteVersion>) -> HttpRequest {
        HttpRequest::push(&PushRequest {
            id,
            payload: b"body".to_vec(),
            base_version: base,
            updated_at: Timestamp::from_millis(1),
        })
        .unwrap()
    }

    #[test]
    fn push_ack_and_conflict() {
        let (handler, log) = handler();
        let id = RecordId::new();

        let response = handler.handle(&push(id, None));
        assert_eq!(response.status, status::OK);
        assert_eq!(PushAck::decode(&response.body).unwrap().version, RemoteVersion::new("v1"));

        log.put(id, b"other".to_vec());
        let response = handler.handle(&push(id, Some(RemoteVersion::new("v1"))));
        assert_eq!(response.status, status::CONFLICT);
        let current = RemoteRecord::decode(&response.body).unwrap();
        assert_eq!(current.payload, b"other");
    }

    #[test]
    fn delete_then_404() {
        let (handler, log) = handler();
        let id = RecordId::new();
        log.put(id, b"x".to_vec());

        let response = handler.handle(&HttpRequest::delete(&id));
        assert_eq!(response.status, status::OK);
        assert_eq!(DeleteAck::decode(&response.body).unwrap().id, id);
        assert_eq!(handler.handle(&HttpRequest::delete(&id)).status, status::NOT_FOUND);
    }

    #[test]
    fn changes_respect_max_page_size() {
        let (handler, log) = handler();
        for _ in 0..3 {
            log.put(RecordId::new(), b"x".to_vec());
        }
        let response = handler.handle(&HttpRequest::changes(&Cursor::origin(), 100));
        let page = ChangesPage::decode(&response.body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
    }

    #[test]
    fn bad_requests_are_400() {
        let (handler, _) = handler();
        let garbage = HttpRequest {
            method: Method::Post,
            path: "/records".into(),
            body: vec![0xff],
        };
        assert_eq!(handler.handle(&garbage).status, status::BAD_REQUEST);

        let unknown = HttpRequest {
            method: Method::Get,
            path: "/nope".into(),
            body: vec![],
        };
        assert_eq!(handler.handle(&unknown).status, status::BAD_REQUEST);

        let cursor = HttpRequest::changes(&Cursor::new("x"), 1);
        assert_eq!(handler.handle(&cursor).status, status::BAD_REQUEST);
    }
}
