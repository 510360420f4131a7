//! Error types for the sync server.

use offsync_core::RecordId;
use offsync_protocol::{status, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed or unroutable request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The cursor was not issued by this server.
    #[error("invalid cursor: {0:?}")]
    InvalidCursor(String),

    /// No live record with this id.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ServerError {
    /// Returns true if the client is at fault (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::InvalidCursor(_)
                | ServerError::NotFound(_)
                | ServerError::Protocol(ProtocolError::Decode(_))
                | ServerError::Protocol(ProtocolError::InvalidRequest(_))
        )
    }

    /// Returns true if the server is at fault (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::NotFound(_) => status::NOT_FOUND,
            e if e.is_client_error() => status::BAD_REQUEST,
            _ => status::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidCursor("x".into()).is_client_error());
        assert_eq!(ServerError::NotFound(RecordId::new()).status(), 404);
        assert_eq!(ServerError::InvalidRequest("bad".into()).status(), 400);
        let encode = ServerError::Protocol(ProtocolError::Encode("oops".into()));
        assert!(encode.is_server_error());
        assert_eq!(encode.status(), 500);
    }
}
