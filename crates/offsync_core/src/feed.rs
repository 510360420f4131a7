//! Change feed of per-record sync-state transitions.
//!
//! Every write that lands in the store emits one [`RecordChange`], after the
//! write is durable. Subscribers get plain `std::sync::mpsc` receivers, so
//! the feed is usable from UI threads without an async runtime.

use crate::id::RecordId;
use crate::record::SyncState;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A record reached a new sync state, or was purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordChange {
    /// Record id.
    pub id: RecordId,
    /// New state; `None` once the record is gone from the store.
    pub sync_state: Option<SyncState>,
}

impl RecordChange {
    pub(crate) fn state(id: RecordId, state: SyncState) -> Self {
        Self {
            id,
            sync_state: Some(state),
        }
    }

    pub(crate) fn purged(id: RecordId) -> Self {
        Self {
            id,
            sync_state: None,
        }
    }
}

/// Fan-out of [`RecordChange`] events in write order.
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<RecordChange>>>,
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for all future changes.
    pub fn subscribe(&self) -> Receiver<RecordChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends a change to every live subscriber, dropping closed ones.
    pub fn emit(&self, change: RecordChange) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        let id = RecordId::new();

        feed.emit(RecordChange::state(id, SyncState::PendingUpload));
        feed.emit(RecordChange::purged(id));

        assert_eq!(
            rx.recv_timeout(Duration::from_millis(100)).unwrap(),
            RecordChange::state(id, SyncState::PendingUpload)
        );
        assert_eq!(rx.recv().unwrap().sync_state, None);
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        let _keep = feed.subscribe();
        drop(rx);

        feed.emit(RecordChange::purged(RecordId::new()));
        assert_eq!(feed.subscriber_count(), 1);
    }
}
