//! # offsync core
//!
//! The local half of an offline-first replica.
//!
//! This crate provides:
//! - The [`Record`] model and its [`SyncState`] lifecycle
//! - A monotonic [`LocalClock`] for `updated_at` stamps
//! - The [`RecordStore`] adapter interface with in-memory and durable
//!   log-structured implementations
//! - The [`LocalStore`] facade: the write API used by the application,
//!   per-record locking, and a change feed of sync-state transitions
//!
//! ## Record lifecycle
//!
//! ```text
//!   create ──► PendingUpload ──push ack──► Synced
//!                  ▲   │                     │
//!                  │   └──────── update ◄────┘
//!   delete (any) ──► PendingDeletion ──delete ack──► purged
//! ```
//!
//! All operations are local and synchronous; nothing here touches the
//! network.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod codec;
mod config;
mod error;
mod feed;
mod id;
mod lock;
mod record;
mod record_store;
mod store;

pub use clock::{ClockSource, LocalClock, ManualClock, SystemClock, Timestamp};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use feed::{ChangeFeed, RecordChange};
pub use id::RecordId;
pub use lock::LockTable;
pub use record::{Cursor, Record, RemoteVersion, SyncState};
pub use record_store::{CompactionStats, LogRecordStore, MemoryRecordStore, RecordStore};
pub use store::{LocalStore, RecordGuard, StateCounts};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
