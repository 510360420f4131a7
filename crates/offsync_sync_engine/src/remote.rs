//! Remote store abstraction.
//!
//! [`RemoteClient`] is the seam between the orchestrator and whatever talks
//! to the authoritative store. Calls are blocking; the orchestrator runs them
//! on worker threads under a timeout.

use offsync_core::{ClockSource, Cursor, RecordId, RemoteVersion, SystemClock, Timestamp};
use offsync_protocol::{ChangesPage, PushRequest, RemoteRecord};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a remote call has no known outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailureKind {
    /// Connection refused, reset or unreachable.
    Network,
    /// The call did not finish within the request timeout.
    Timeout,
    /// The server answered with a 5xx status.
    Server(u16),
    /// The response could not be understood.
    Protocol,
}

impl fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailureKind::Network => f.write_str("network"),
            TransportFailureKind::Timeout => f.write_str("timeout"),
            TransportFailureKind::Server(status) => write!(f, "server {status}"),
            TransportFailureKind::Protocol => f.write_str("protocol"),
        }
    }
}

/// A remote call whose outcome is unknown. Always worth retrying later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct TransportFailure {
    /// Failure class.
    pub kind: TransportFailureKind,
    /// Details.
    pub message: String,
}

impl TransportFailure {
    /// Creates a failure.
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Network, message)
    }

    /// A timeout after `after`.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TransportFailureKind::Timeout,
            format!("no response after {after:?}"),
        )
    }

    /// An undecodable or unexpected response.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(TransportFailureKind::Protocol, message)
    }

    /// True for timeouts.
    pub fn is_timeout(&self) -> bool {
        self.kind == TransportFailureKind::Timeout
    }
}

/// Definitive answer to a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted at the given version.
    Ack(RemoteVersion),
    /// Refused because the base version was stale; carries the current
    /// remote record.
    Reject(RemoteRecord),
}

/// Access to the authoritative remote store.
pub trait RemoteClient: Send + Sync {
    /// Creates or updates a record.
    fn push(&self, request: &PushRequest) -> Result<PushOutcome, TransportFailure>;

    /// Deletes a record. Deleting a record the remote does not have is
    /// acknowledged.
    fn delete(&self, id: &RecordId) -> Result<(), TransportFailure>;

    /// Fetches one page of changes after `cursor`.
    fn fetch_changes_since(
        &self,
        cursor: &Cursor,
        limit: u32,
    ) -> Result<ChangesPage, TransportFailure>;
}

impl<R: RemoteClient + ?Sized> RemoteClient for std::sync::Arc<R> {
    fn push(&self, request: &PushRequest) -> Result<PushOutcome, TransportFailure> {
        (**self).push(request)
    }

    fn delete(&self, id: &RecordId) -> Result<(), TransportFailure> {
        (**self).delete(id)
    }

    fn fetch_changes_since(
        &self,
        cursor: &Cursor,
        limit: u32,
    ) -> Result<ChangesPage, TransportFailure> {
        (**self).fetch_changes_since(cursor, limit)
    }
}

/// A scriptable in-memory remote for tests.
///
/// Keeps its own record map and change list, assigns versions `m1`, `m2`,
/// ... and can be told to fail or stall specific calls.
#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    records: HashMap<RecordId, RemoteRecord>,
    changes: Vec<RecordId>,
    next_version: u64,
    push_failures: VecDeque<TransportFailure>,
    fetch_failures: VecDeque<TransportFailure>,
    delay: Option<Duration>,
    offline: bool,
    push_calls: usize,
    delete_calls: usize,
    fetch_calls: usize,
}

impl MockState {
    fn commit(&mut self, mut record: RemoteRecord) -> RemoteRecord {
        self.next_version += 1;
        record.version = RemoteVersion::new(format!("m{}", self.next_version));
        self.changes.push(record.id);
        self.records.insert(record.id, record.clone());
        record
    }
}

impl MockRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a network error until turned back on.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Makes every call sleep first.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Queues a failure for the next push or delete.
    pub fn fail_next_push(&self, failure: TransportFailure) {
        self.state.lock().push_failures.push_back(failure);
    }

    /// Queues a failure for the next changes fetch.
    pub fn fail_next_fetch(&self, failure: TransportFailure) {
        self.state.lock().fetch_failures.push_back(failure);
    }

    /// Writes a record as another client would.
    pub fn put_remote(&self, id: RecordId, payload: Vec<u8>) -> RemoteRecord {
        self.state.lock().commit(RemoteRecord {
            id,
            payload,
            version: RemoteVersion::new(""),
            updated_at: Timestamp::from_millis(SystemClock.now_ms()),
            deleted: false,
        })
    }

    /// Returns the remote state of a record.
    pub fn get(&self, id: &RecordId) -> Option<RemoteRecord> {
        self.state.lock().records.get(id).cloned()
    }

    /// Number of push calls received.
    pub fn push_calls(&self) -> usize {
        self.state.lock().push_calls
    }

    /// Number of delete calls received.
    pub fn delete_calls(&self) -> usize {
        self.state.lock().delete_calls
    }

    /// Number of fetch calls received.
    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    fn enter(&self) -> Result<(), TransportFailure> {
        let (delay, offline) = {
            let state = self.state.lock();
            (state.delay, state.offline)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if offline {
            return Err(TransportFailure::network("remote unreachable"));
        }
        Ok(())
    }
}

impl RemoteClient for MockRemote {
    fn push(&self, request: &PushRequest) -> Result<PushOutcome, TransportFailure> {
        self.state.lock().push_calls += 1;
        self.enter()?;
        let mut state = self.state.lock();
        if let Some(failure) = state.push_failures.pop_front() {
            return Err(failure);
        }
        if let Some(current) = state.records.get(&request.id) {
            if request.base_version.as_ref() != Some(&current.version) {
                return Ok(PushOutcome::Reject(current.clone()));
            }
            if current.payload == request.payload && !current.deleted {
                return Ok(PushOutcome::Ack(current.version.clone()));
            }
        }
        let committed = state.commit(RemoteRecord {
            id: request.id,
            payload: request.payload.clone(),
            version: RemoteVersion::new(""),
            updated_at: request.updated_at,
            deleted: false,
        });
        Ok(PushOutcome::Ack(committed.version))
    }

    fn delete(&self, id: &RecordId) -> Result<(), TransportFailure> {
        self.state.lock().delete_calls += 1;
        self.enter()?;
        let mut state = self.state.lock();
        if let Some(failure) = state.push_failures.pop_front() {
            return Err(failure);
        }
        match state.records.get(id) {
            Some(current) if !current.deleted => {
                let tombstone = RemoteRecord {
                    payload: Vec::new(),
                    deleted: true,
                    ..current.clone()
                };
                state.commit(tombstone);
            }
            _ => {}
        }
        Ok(())
    }

    fn fetch_changes_since(
        &self,
        cursor: &Cursor,
        limit: u32,
    ) -> Result<ChangesPage, TransportFailure> {
        self.state.lock().fetch_calls += 1;
        self.enter()?;
        let mut state = self.state.lock();
        if let Some(failure) = state.fetch_failures.pop_front() {
            return Err(failure);
        }

        let start: usize = if cursor.is_origin() {
            0
        } else {
            cursor
                .as_str()
                .parse()
                .map_err(|_| TransportFailure::protocol(format!("bad cursor {cursor}")))?
        };
        let end = (start + limit as usize).min(state.changes.len());
        let records = state.changes[start.min(end)..end]
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect();
        Ok(ChangesPage {
            records,
            next_cursor: Cursor::new(end.to_string()),
            has_more: end < state.changes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(id: RecordId, base: Option<RemoteVersion>) -> PushRequest {
        PushRequest {
            id,
            payload: b"x".to_vec(),
            base_version: base,
            updated_at: Timestamp::from_millis(1),
        }
    }

    #[test]
    fn mock_versions_and_rejects() {
        let remote = MockRemote::new();
        let id = RecordId::new();
        let PushOutcome::Ack(v1) = remote.push(&push(id, None)).unwrap() else {
            panic!("expected ack");
        };
        assert_eq!(v1, RemoteVersion::new("m1"));
        assert!(matches!(
            remote.push(&push(id, None)).unwrap(),
            PushOutcome::Reject(_)
        ));
        assert_eq!(remote.push(&push(id, Some(v1.clone()))).unwrap(), PushOutcome::Ack(v1));
        assert_eq!(remote.push_calls(), 3);
    }

    #[test]
    fn mock_scripted_failures() {
        let remote = MockRemote::new();
        remote.fail_next_push(TransportFailure::network("reset"));
        assert!(remote.push(&push(RecordId::new(), None)).is_err());
        assert!(remote.push(&push(RecordId::new(), None)).is_ok());

        remote.set_offline(true);
        let err = remote.fetch_changes_since(&Cursor::origin(), 10).unwrap_err();
        assert_eq!(err.kind, TransportFailureKind::Network);
    }

    #[test]
    fn mock_changes_paging() {
        let remote = MockRemote::new();
        for _ in 0..3 {
            remote.put_remote(RecordId::new(), b"r".to_vec());
        }
        let first = remote.fetch_changes_since(&Cursor::origin(), 2).unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.has_more);
        let second = remote.fetch_changes_since(&first.next_cursor, 2).unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.has_more);
    }

    #[test]
    fn failure_display() {
        let failure = TransportFailure::new(TransportFailureKind::Server(503), "unavailable");
        assert_eq!(failure.to_string(), "server 503 failure: unavailable");
        assert!(TransportFailure::timeout(Duration::from_secs(1)).is_timeout());
    }
}
