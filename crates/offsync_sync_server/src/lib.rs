//! # offsync sync server
//!
//! Reference implementation of the remote store offsync replicas sync
//! against.
//!
//! This crate provides:
//! - An authoritative record map with optimistic concurrency on pushes
//! - An append-only change log exposed as a paginated "changes since" feed
//! - Request handling for the HTTP routes in `offsync_protocol`
//!
//! # Semantics
//!
//! - Every accepted write gets a new version tag `v{n}` and a change-log
//!   sequence number `n`; cursors are decimal sequence numbers.
//! - A push whose base version is not the record's current version is
//!   rejected with the current record.
//! - Re-pushing identical content on the current version is acknowledged
//!   without a new change-log entry.
//! - Deletes leave a tombstone in the change log.
//!
//! There is no network listener here: embed [`SyncServer::handle_http`]
//! in any HTTP stack, or call it in-process from tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod changelog;
mod config;
mod error;
mod handler;
mod server;

pub use changelog::{ChangeLog, PushDecision};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use server::SyncServer;
