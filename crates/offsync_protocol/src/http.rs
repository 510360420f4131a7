//! HTTP envelope and routes.
//!
//! Only what the remote protocol needs: a method, a path with an optional
//! query string, and a CBOR body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::PushRequest;
use offsync_core::{Cursor, RecordId};
use std::fmt;

/// Status codes used by the protocol.
pub mod status {
    /// Request handled.
    pub const OK: u16 = 200;
    /// Malformed request.
    pub const BAD_REQUEST: u16 = 400;
    /// No such record.
    pub const NOT_FOUND: u16 = 404;
    /// Push rejected; body carries the current remote record.
    pub const CONFLICT: u16 = 409;
    /// The server failed; outcome unknown.
    pub const INTERNAL_ERROR: u16 = 500;
    /// The server is temporarily unavailable.
    pub const UNAVAILABLE: u16 = 503;
}

const RECORDS: &str = "/records";
const CHANGES: &str = "/changes";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// An HTTP request without headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Path and query, e.g. `/changes?cursor=4&limit=100`.
    pub path: String,
    /// CBOR body; empty for GET and DELETE.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// `POST /records`.
    pub fn push(request: &PushRequest) -> ProtocolResult<Self> {
        Ok(Self {
            method: Method::Post,
            path: RECORDS.to_string(),
            body: request.encode()?,
        })
    }

    /// `DELETE /records/{id}`.
    pub fn delete(id: &RecordId) -> Self {
        Self {
            method: Method::Delete,
            path: format!("{RECORDS}/{id}"),
            body: Vec::new(),
        }
    }

    /// `GET /changes?cursor=..&limit=..`.
    pub fn changes(cursor: &Cursor, limit: u32) -> Self {
        Self {
            method: Method::Get,
            path: format!(
                "{CHANGES}?cursor={}&limit={limit}",
                percent_encode(cursor.as_str())
            ),
            body: Vec::new(),
        }
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// CBOR body, or UTF-8 text for errors.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A response with a body.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// A response with a text message.
    pub fn text(status: u16, message: impl fmt::Display) -> Self {
        Self {
            status,
            body: message.to_string().into_bytes(),
        }
    }

    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for 5xx.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// A parsed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `POST /records`.
    Push,
    /// `DELETE /records/{id}`.
    Delete(RecordId),
    /// `GET /changes`.
    Changes {
        /// Where to resume.
        cursor: Cursor,
        /// Page size requested by the client, if any.
        limit: Option<u32>,
    },
}

impl Route {
    /// Matches a request against the route table.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRequest`] for unknown routes or bad
    /// parameters.
    pub fn parse(method: Method, path: &str) -> ProtocolResult<Self> {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path, ""),
        };

        match (method, path) {
            (Method::Post, RECORDS) => Ok(Route::Push),
            (Method::Get, CHANGES) => {
                let mut cursor = Cursor::origin();
                let mut limit = None;
                for pair in query.split('&').filter(|p| !p.is_empty()) {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    match key {
                        "cursor" => cursor = Cursor::new(percent_decode(value)?),
                        "limit" => {
                            limit = Some(value.parse().map_err(|_| {
                                ProtocolError::InvalidRequest(format!("bad limit: {value}"))
                            })?);
                        }
                        _ => {}
                    }
                }
                Ok(Route::Changes { cursor, limit })
            }
            (Method::Delete, p) => {
                let id = p
                    .strip_prefix(RECORDS)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .ok_or_else(|| ProtocolError::InvalidRequest(format!("no route: DELETE {p}")))?;
                let id = id
                    .parse()
                    .map_err(|_| ProtocolError::InvalidRequest(format!("bad record id: {id}")))?;
                Ok(Route::Delete(id))
            }
            (m, p) => Err(ProtocolError::InvalidRequest(format!("no route: {m} {p}"))),
        }
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn percent_decode(encoded: &str) -> ProtocolResult<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| ProtocolError::InvalidRequest(format!("bad escape in {encoded}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| ProtocolError::InvalidRequest(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{RemoteVersion, Timestamp};
    use proptest::prelude::*;

    #[test]
    fn push_route() {
        let push = PushRequest {
            id: RecordId::new(),
            payload: vec![1],
            base_version: Some(RemoteVersion::new("v1")),
            updated_at: Timestamp::from_millis(5),
        };
        let request = HttpRequest::push(&push).unwrap();
        assert_eq!(Route::parse(request.method, &request.path).unwrap(), Route::Push);
        assert_eq!(PushRequest::decode(&request.body).unwrap(), push);
    }

    #[test]
    fn delete_route_carries_id() {
        let id = RecordId::new();
        let request = HttpRequest::delete(&id);
        assert_eq!(request.path, format!("/records/{id}"));
        assert_eq!(Route::parse(request.method, &request.path).unwrap(), Route::Delete(id));
    }

    #[test]
    fn changes_route_from_origin() {
        let request = HttpRequest::changes(&Cursor::origin(), 50);
        assert_eq!(request.path, "/changes?cursor=&limit=50");
        assert_eq!(
            Route::parse(Method::Get, &request.path).unwrap(),
            Route::Changes {
                cursor: Cursor::origin(),
                limit: Some(50)
            }
        );
    }

    #[test]
    fn bad_requests() {
        assert!(Route::parse(Method::Get, "/records").is_err());
        assert!(Route::parse(Method::Delete, "/records/not-a-uuid").is_err());
        assert!(Route::parse(Method::Get, "/changes?limit=many").is_err());
        assert!(Route::parse(Method::Get, "/changes?cursor=%G1").is_err());
    }

    #[test]
    fn response_classes() {
        assert!(HttpResponse::new(status::OK, vec![]).is_success());
        assert!(HttpResponse::text(status::UNAVAILABLE, "down").is_server_error());
        assert!(!HttpResponse::new(status::CONFLICT, vec![]).is_success());
    }

    proptest! {
        #[test]
        fn any_cursor_survives_the_query_string(token in ".{0,40}", limit in 1u32..1000) {
            let cursor = Cursor::new(token);
            let request = HttpRequest::changes(&cursor, limit);
            prop_assert_eq!(
                Route::parse(Method::Get, &request.path).unwrap(),
                Route::Changes { cursor, limit: Some(limit) }
            );
        }
    }
}
