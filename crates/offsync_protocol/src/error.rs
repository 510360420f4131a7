//! Protocol errors.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or routing messages.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes did not decode to the expected message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request does not match any route.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
