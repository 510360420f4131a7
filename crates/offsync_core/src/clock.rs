//! Local timestamps.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Builds a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of wall-clock time.
///
/// Injected so tests can drive time by hand.
pub trait ClockSource: Send + Sync {
    /// Current time in milliseconds since the epoch.
    fn now_ms(&self) -> u64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// A hand-driven clock for tests. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<u64>>,
}

impl ManualClock {
    /// Creates a clock reading `now_ms`.
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now_ms)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, millis: u64) {
        *self.now.lock() += millis;
    }

    /// Sets the clock, possibly backwards.
    pub fn set(&self, now_ms: u64) {
        *self.now.lock() = now_ms;
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.lock()
    }
}

/// Produces strictly increasing timestamps for local writes.
///
/// If the wall clock stalls or steps backwards, the last issued value is
/// bumped by one millisecond instead, so two writes to the same record never
/// share an `updated_at`.
pub struct LocalClock {
    source: Box<dyn ClockSource>,
    last: Mutex<u64>,
}

impl LocalClock {
    /// Creates a clock over the given source.
    pub fn new(source: impl ClockSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            last: Mutex::new(0),
        }
    }

    /// Issues the next timestamp.
    pub fn now(&self) -> Timestamp {
        let physical = self.source.now_ms();
        let mut last = self.last.lock();
        *last = if physical > *last { physical } else { *last + 1 };
        Timestamp(*last)
    }

    /// Makes sure later timestamps sort after `seen`.
    ///
    /// Called when a remote `updated_at` is written locally.
    pub fn observe(&self, seen: Timestamp) {
        let mut last = self.last.lock();
        if seen.0 > *last {
            *last = seen.0;
        }
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl fmt::Debug for LocalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClock")
            .field("last", &*self.last.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_wall_clock_when_it_advances() {
        let manual = ManualClock::new(1_000);
        let clock = LocalClock::new(manual.clone());
        assert_eq!(clock.now(), Timestamp::from_millis(1_000));
        manual.advance(50);
        assert_eq!(clock.now(), Timestamp::from_millis(1_050));
    }

    #[test]
    fn strictly_increasing_when_clock_stalls_or_rewinds() {
        let manual = ManualClock::new(1_000);
        let clock = LocalClock::new(manual.clone());
        let a = clock.now();
        let b = clock.now();
        manual.set(10);
        let c = clock.now();
        assert!(a < b && b < c);
    }

    #[test]
    fn observe_pushes_future_writes_past_remote_stamp() {
        let clock = LocalClock::new(ManualClock::new(100));
        clock.observe(Timestamp::from_millis(5_000));
        assert!(clock.now() > Timestamp::from_millis(5_000));
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
