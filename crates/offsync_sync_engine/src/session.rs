//! Per-pass bookkeeping and the summary published when a pass ends.

use crate::remote::{TransportFailure, TransportFailureKind};
use offsync_core::{RecordId, StoreError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

/// Why a single record failed during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network, server or protocol failure.
    Transport,
    /// The remote call timed out.
    Timeout,
    /// The local store failed.
    Storage,
    /// The record disappeared locally while the pass was working on it.
    NotFound,
}

impl From<&TransportFailure> for FailureKind {
    fn from(failure: &TransportFailure) -> Self {
        match failure.kind {
            TransportFailureKind::Timeout => FailureKind::Timeout,
            _ => FailureKind::Transport,
        }
    }
}

impl From<&StoreError> for FailureKind {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FailureKind::NotFound,
            _ => FailureKind::Storage,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::Storage => "storage",
            FailureKind::NotFound => "not found",
        })
    }
}

/// Why a whole pass failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The remote could not be reached. Retried with backoff.
    Transport(TransportFailure),
    /// The local store failed.
    Storage(String),
    /// A worker task died.
    Internal(String),
}

impl FailureReason {
    /// True if the failure should be shown as "will retry" rather than as an
    /// error.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureReason::Transport(_))
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(failure) => write!(f, "{failure}"),
            FailureReason::Storage(message) => write!(f, "storage failure: {message}"),
            FailureReason::Internal(message) => write!(f, "internal failure: {message}"),
        }
    }
}

/// Terminal outcome of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Uploads drained, remote changes applied and the cursor committed.
    Completed,
    /// The pass stopped early or could not commit.
    Failed(FailureReason),
}

impl PassOutcome {
    /// True for [`PassOutcome::Completed`].
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed)
    }
}

/// Summary of a finished pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Pass number, starting at 1.
    pub pass: u64,
    /// Wall-clock start.
    pub started_at: SystemTime,
    /// How long the pass took.
    pub duration: Duration,
    /// Dirty records the upload phase picked up.
    pub attempted: usize,
    /// Records whose upload or deletion was confirmed, or whose conflict was
    /// resolved.
    pub succeeded: usize,
    /// Records pushed and acknowledged.
    pub uploaded: usize,
    /// Remote records written locally.
    pub downloaded: usize,
    /// Records sent to the conflict resolver.
    pub conflicted: usize,
    /// Dirty records not attempted because the upload phase aborted.
    pub skipped: usize,
    /// Every record that failed, with the reason.
    pub failed: BTreeMap<RecordId, FailureKind>,
    /// Terminal outcome.
    pub outcome: PassOutcome,
}

impl SyncSummary {
    /// True if the pass completed.
    pub fn is_completed(&self) -> bool {
        self.outcome.is_completed()
    }
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pass {}: {} uploaded, {} downloaded, {} conflicted, {} failed",
            self.pass,
            self.uploaded,
            self.downloaded,
            self.conflicted,
            self.failed.len()
        )?;
        if let PassOutcome::Failed(reason) = &self.outcome {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Mutable record of one pass, owned by the pass while it runs.
#[derive(Debug)]
pub struct SyncSession {
    pass: u64,
    started_at: SystemTime,
    started: Instant,
    attempted: BTreeSet<RecordId>,
    succeeded: BTreeSet<RecordId>,
    failed: BTreeMap<RecordId, FailureKind>,
    uploaded: usize,
    downloaded: usize,
    conflicted: usize,
    skipped: usize,
}

impl SyncSession {
    /// Starts pass number `pass`.
    pub fn start(pass: u64) -> Self {
        Self {
            pass,
            started_at: SystemTime::now(),
            started: Instant::now(),
            attempted: BTreeSet::new(),
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            uploaded: 0,
            downloaded: 0,
            conflicted: 0,
            skipped: 0,
        }
    }

    /// The pass number.
    pub fn pass(&self) -> u64 {
        self.pass
    }

    /// Notes that `id` is being attempted.
    pub fn attempt(&mut self, id: RecordId) {
        self.attempted.insert(id);
    }

    /// Records a confirmed push.
    pub fn uploaded(&mut self, id: RecordId) {
        self.uploaded += 1;
        self.succeed(id);
    }

    /// Records a confirmed deletion, or an upload that became moot.
    pub fn succeed(&mut self, id: RecordId) {
        self.failed.remove(&id);
        self.succeeded.insert(id);
    }

    /// Records a remote record written locally.
    pub fn downloaded(&mut self) {
        self.downloaded += 1;
    }

    /// Records a record handed to the conflict resolver.
    pub fn conflicted(&mut self) {
        self.conflicted += 1;
    }

    /// Records `count` records skipped after an abort.
    pub fn skipped(&mut self, count: usize) {
        self.skipped += count;
    }

    /// Records a failure for `id`. A later failure replaces an earlier one.
    pub fn fail(&mut self, id: RecordId, kind: FailureKind) {
        self.succeeded.remove(&id);
        self.failed.insert(id, kind);
    }

    /// Number of records that succeeded so far.
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    /// True if any record failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Closes the session.
    pub fn finish(self, outcome: PassOutcome) -> SyncSummary {
        SyncSummary {
            pass: self.pass,
            started_at: self.started_at,
            duration: self.started.elapsed(),
            attempted: self.attempted.len(),
            succeeded: self.succeeded.len(),
            uploaded: self.uploaded,
            downloaded: self.downloaded,
            conflicted: self.conflicted,
            skipped: self.skipped,
            failed: self.failed,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds() {
        assert_eq!(
            FailureKind::from(&TransportFailure::timeout(Duration::from_secs(1))),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::from(&TransportFailure::network("reset")),
            FailureKind::Transport
        );
        assert_eq!(
            FailureKind::from(&StoreError::NotFound(RecordId::new())),
            FailureKind::NotFound
        );
        assert_eq!(
            FailureKind::from(&StoreError::Codec("x".into())),
            FailureKind::Storage
        );
    }

    #[test]
    fn session_counts() {
        let a = RecordId::new();
        let b = RecordId::new();
        let mut session = SyncSession::start(3);
        session.attempt(a);
        session.attempt(b);
        session.uploaded(a);
        session.fail(b, FailureKind::Transport);
        session.skipped(2);
        session.downloaded();

        let summary = session.finish(PassOutcome::Failed(FailureReason::Transport(
            TransportFailure::network("reset"),
        )));
        assert_eq!(summary.pass, 3);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed.get(&b), Some(&FailureKind::Transport));
        assert!(!summary.is_completed());
        assert!(summary.to_string().contains("1 failed"));
    }

    #[test]
    fn later_success_clears_failure() {
        let id = RecordId::new();
        let mut session = SyncSession::start(1);
        session.fail(id, FailureKind::Storage);
        session.succeed(id);
        let summary = session.finish(PassOutcome::Completed);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.succeeded, 1);
    }
}
