//! HTTP remote client.
//!
//! The HTTP library is abstracted behind [`HttpClient`] so any stack
//! (reqwest, ureq, a platform networking API) can be plugged in.
//! [`HttpRemoteClient`] maps the remote protocol onto it.

use crate::remote::{PushOutcome, RemoteClient, TransportFailure, TransportFailureKind};
use offsync_core::{Cursor, RecordId};
use offsync_protocol::{
    status, ChangesPage, HttpRequest, HttpResponse, PushAck, PushRequest, RemoteRecord,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Sends one HTTP request.
///
/// Return `Err` only when no response was received (connection refused,
/// reset, DNS failure); any status code is an `Ok` response.
pub trait HttpClient: Send + Sync {
    /// Sends `request` to the server.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// [`RemoteClient`] over HTTP with CBOR bodies.
pub struct HttpRemoteClient<C: HttpClient> {
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemoteClient<C> {
    /// Wraps an HTTP client.
    pub fn new(client: C) -> Self {
        Self {
            client,
            last_error: RwLock::new(None),
        }
    }

    /// The most recent transport failure, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportFailure> {
        debug!(method = %request.method, path = %request.path, "remote request");
        let result = self
            .client
            .send(request)
            .map_err(TransportFailure::network)
            .and_then(|response| {
                if response.is_server_error() {
                    Err(TransportFailure::new(
                        TransportFailureKind::Server(response.status),
                        String::from_utf8_lossy(&response.body).into_owned(),
                    ))
                } else {
                    Ok(response)
                }
            });

        match &result {
            Ok(_) => *self.last_error.write() = None,
            Err(failure) => *self.last_error.write() = Some(failure.to_string()),
        }
        result
    }
}

fn unexpected(response: &HttpResponse) -> TransportFailure {
    TransportFailure::protocol(format!(
        "unexpected status {}: {}",
        response.status,
        String::from_utf8_lossy(&response.body)
    ))
}

fn decode_failure(err: offsync_protocol::ProtocolError) -> TransportFailure {
    TransportFailure::protocol(err.to_string())
}

impl<C: HttpClient> RemoteClient for HttpRemoteClient<C> {
    fn push(&self, request: &PushRequest) -> Result<PushOutcome, TransportFailure> {
        let http = HttpRequest::push(request).map_err(decode_failure)?;
        let response = self.send(http)?;
        match response.status {
            status::OK => {
                let ack = PushAck::decode(&response.body).map_err(decode_failure)?;
                Ok(PushOutcome::Ack(ack.version))
            }
            status::CONFLICT => {
                let current = RemoteRecord::decode(&response.body).map_err(decode_failure)?;
                Ok(PushOutcome::Reject(current))
            }
            _ => Err(unexpected(&response)),
        }
    }

    fn delete(&self, id: &RecordId) -> Result<(), TransportFailure> {
        let response = self.send(HttpRequest::delete(id))?;
        match response.status {
            status::OK | status::NOT_FOUND => Ok(()),
            _ => Err(unexpected(&response)),
        }
    }

    fn fetch_changes_since(
        &self,
        cursor: &Cursor,
        limit: u32,
    ) -> Result<ChangesPage, TransportFailure> {
        let response = self.send(HttpRequest::changes(cursor, limit))?;
        match response.status {
            status::OK => ChangesPage::decode(&response.body).map_err(decode_failure),
            _ => Err(unexpected(&response)),
        }
    }
}

/// Something that answers HTTP requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles one request.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<F> LoopbackServer for F
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync,
{
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        self(request)
    }
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// An [`HttpClient`] that hands requests straight to a server in the same
/// process.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Connects to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        Ok(self.server.handle(&request))
    }
}
