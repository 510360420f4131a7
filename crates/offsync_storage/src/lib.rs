//! # offsync storage
//!
//! Byte-store backends for the offsync local record log.
//!
//! Backends are **opaque byte stores**: they append, read back, flush and
//! truncate bytes. Record framing, checksums and replay live in
//! `offsync_core`; nothing here knows what a record is.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - for tests and ephemeral replicas, optionally with a
//!   capacity limit to simulate a full disk
//! - [`FileBackend`] - for persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
