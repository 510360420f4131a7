//! # offsync sync engine
//!
//! Keeps a [`LocalStore`](offsync_core::LocalStore) in sync with an
//! authoritative remote store.
//!
//! This crate provides:
//! - [`SyncOrchestrator`]: one pass at a time, trigger coalescing, retries
//!   with exponential backoff and full jitter
//! - [`ConnectivityMonitor`]: the reachability signal that drives automatic
//!   passes
//! - [`RemoteClient`]: the remote seam, with an HTTP adapter and a scriptable
//!   mock
//! - [`ConflictResolver`]: pluggable conflict policy, remote wins by default
//! - [`StatusStream`]: observable phase, last summary and retry countdown
//!
//! ## Pass
//!
//! ```text
//!   Idle ──trigger──► Uploading ──► Downloading ──► Reconciling ──► Completed
//!                        │               │               │
//!                        └───────────────┴───────────────┴──► Failed ──backoff──► (next pass)
//! ```
//!
//! 1. Push every `PendingUpload` record and send every `PendingDeletion`,
//!    several at once. A rejected push is reconciled on the spot. A transport
//!    failure stops the remaining uploads; the pass only continues if at
//!    least one record went through.
//! 2. Fetch every page of remote changes after the saved cursor.
//! 3. Apply them under per-record locks, consulting the resolver for records
//!    that are dirty locally, then commit the new cursor.
//!
//! ## Key Invariants
//!
//! - Local writes never wait for the network
//! - The cursor only advances after every fetched record is applied
//! - `Conflicted` is never persisted
//! - Nothing that happens in a pass stops the orchestrator

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod http;
mod orchestrator;
mod pass;
mod remote;
mod resolver;
mod session;
mod status;

pub use config::{Jitter, RetryConfig, SyncConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRemoteClient, LoopbackClient, LoopbackServer};
pub use orchestrator::{SyncOrchestrator, SyncOrchestratorBuilder};
pub use remote::{MockRemote, PushOutcome, RemoteClient, TransportFailure, TransportFailureKind};
pub use resolver::{ConflictResolver, LastWriteWins, LocalWins, RemoteWins, Resolution};
pub use session::{FailureKind, FailureReason, PassOutcome, SyncSession, SyncSummary};
pub use status::{StatusStream, SyncPhase, SyncStatus};
