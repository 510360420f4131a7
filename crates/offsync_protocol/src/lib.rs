//! # offsync protocol
//!
//! Wire types for the remote store that offsync replicas talk to.
//!
//! This crate provides:
//! - Message types for pushes, deletions and the "changes since" feed
//! - A CBOR codec for all of them
//! - A minimal HTTP request/response envelope and the route table shared by
//!   the client adapter and the reference server
//!
//! This is a pure protocol crate with no I/O.
//!
//! ## Routes
//!
//! | Request                               | Success           | Other              |
//! |---------------------------------------|-------------------|--------------------|
//! | `POST /records` + [`PushRequest`]     | `200` [`PushAck`] | `409` [`RemoteRecord`] |
//! | `DELETE /records/{id}`                | `200` [`DeleteAck`] | `404` (already gone) |
//! | `GET /changes?cursor=..&limit=..`     | `200` [`ChangesPage`] |                |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod http;
mod messages;

pub use codec::{decode, encode};
pub use error::{ProtocolError, ProtocolResult};
pub use http::{status, HttpRequest, HttpResponse, Method, Route};
pub use messages::{ChangesPage, DeleteAck, PushAck, PushRequest, RemoteRecord};
