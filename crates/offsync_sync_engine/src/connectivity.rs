//! Network reachability signal.

use parking_lot::RwLock;
use std::fmt;
use tokio::sync::broadcast;
use tracing::info;

const CHANNEL_CAPACITY: usize = 16;

/// Whether the remote is believed reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Reachable.
    Online,
    /// Unreachable.
    Offline,
}

impl Connectivity {
    /// True for [`Connectivity::Online`].
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Connectivity::Online => "online",
            Connectivity::Offline => "offline",
        })
    }
}

/// Holds the current reachability and broadcasts its transitions.
///
/// The platform layer calls [`set`](Self::set) whenever it learns something;
/// repeated reports of the same state are swallowed, so subscribers see at
/// most one event per actual change.
pub struct ConnectivityMonitor {
    current: RwLock<Connectivity>,
    tx: broadcast::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    /// Creates a monitor starting in `initial`.
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(initial),
            tx,
        }
    }

    /// Records the latest observation. Returns true if it was a transition.
    pub fn set(&self, state: Connectivity) -> bool {
        let mut current = self.current.write();
        if *current == state {
            return false;
        }
        let from = *current;
        info!(%from, to = %state, "connectivity changed");
        *current = state;
        // Sent under the lock so subscribers see transitions in order.
        let _ = self.tx.send(state);
        true
    }

    /// Returns the current state.
    pub fn current(&self) -> Connectivity {
        *self.current.read()
    }

    /// True if currently online.
    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Subscribes to future transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("current", &self.current())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
