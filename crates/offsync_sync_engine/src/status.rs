//! Observable orchestrator status.

use crate::session::{FailureReason, SyncSummary};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Where the orchestrator is in its cycle.
///
/// Once a pass ends the orchestrator is idle again, and the phase carries the
/// pass result: `Completed` and `Failed` are idle phases, as is `Idle`
/// itself before the first pass. Use [`is_idle`](Self::is_idle) rather than
/// matching on `Idle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPhase {
    /// No pass running and none has finished yet.
    Idle,
    /// Pushing dirty records.
    Uploading,
    /// Fetching remote changes.
    Downloading,
    /// Applying fetched records and resolving conflicts.
    Reconciling,
    /// The last pass completed.
    Completed(SyncSummary),
    /// The last pass failed.
    Failed(FailureReason),
}

impl SyncPhase {
    /// True when no pass is running, whether or not one has finished.
    pub fn is_idle(&self) -> bool {
        !self.is_active()
    }

    /// True while a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncPhase::Uploading | SyncPhase::Downloading | SyncPhase::Reconciling
        )
    }
}

/// Snapshot of the orchestrator as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current phase.
    pub phase: SyncPhase,
    /// Last known connectivity.
    pub online: bool,
    /// A trigger arrived during the current pass; another pass follows it.
    pub pending: bool,
    /// Summary of the last finished pass.
    pub last_summary: Option<SyncSummary>,
    /// Reason of the last failed pass, cleared by a completed pass.
    pub last_failure: Option<FailureReason>,
    /// When the next automatic retry fires.
    pub next_retry_at: Option<Instant>,
    /// Consecutive failed passes.
    pub retry_attempt: u32,
}

impl SyncStatus {
    pub(crate) fn new(online: bool) -> Self {
        Self {
            phase: SyncPhase::Idle,
            online,
            pending: false,
            last_summary: None,
            last_failure: None,
            next_retry_at: None,
            retry_attempt: 0,
        }
    }

    /// Time left until the next automatic retry.
    pub fn retry_countdown(&self) -> Option<Duration> {
        self.next_retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// True while a pass is running.
    pub fn is_syncing(&self) -> bool {
        self.phase.is_active()
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            SyncPhase::Idle => f.write_str("idle")?,
            SyncPhase::Uploading => f.write_str("uploading")?,
            SyncPhase::Downloading => f.write_str("downloading")?,
            SyncPhase::Reconciling => f.write_str("reconciling")?,
            SyncPhase::Completed(summary) => write!(f, "synced ({summary})")?,
            SyncPhase::Failed(reason) if reason.is_transient() => {
                write!(f, "sync interrupted: {reason}")?
            }
            SyncPhase::Failed(reason) => write!(f, "sync failed: {reason}")?,
        }
        if !self.online {
            f.write_str(", offline")?;
        }
        if let Some(left) = self.retry_countdown() {
            write!(f, ", will retry in {}s", left.as_secs().max(1))?;
        }
        Ok(())
    }
}

/// Stream of status updates.
///
/// The first [`next`](Self::next) returns the current status immediately;
/// later calls wait for a change. Intermediate values may be skipped when
/// the reader is slower than the orchestrator; the latest one is never lost.
/// Returns `None` once the orchestrator has shut down.
#[derive(Debug)]
pub struct StatusStream {
    rx: watch::Receiver<SyncStatus>,
    primed: bool,
}

impl StatusStream {
    pub(crate) fn new(rx: watch::Receiver<SyncStatus>) -> Self {
        Self { rx, primed: false }
    }

    /// Waits for the next status.
    pub async fn next(&mut self) -> Option<SyncStatus> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Waits until a status satisfies `predicate`, checking the current one
    /// first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SyncStatus) -> bool,
    ) -> Option<SyncStatus> {
        self.primed = true;
        self.rx
            .wait_for(|status| predicate(status))
            .await
            .ok()
            .map(|status| status.clone())
    }

    /// The latest status without waiting.
    pub fn current(&self) -> SyncStatus {
        self.rx.borrow().clone()
    }
}
