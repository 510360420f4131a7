//! The sync orchestrator.
//!
//! A single driver task owns the pass state machine. Triggers reach it over
//! an mpsc channel, connectivity transitions over the monitor's broadcast
//! channel, and it publishes [`SyncStatus`] over a watch channel. At most one
//! pass runs at a time; triggers arriving during a pass collapse into one
//! pending flag.

use crate::config::{RetryConfig, SyncConfig};
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::error::{SyncError, SyncResult};
use crate::pass::{run_pass, PassContext};
use crate::remote::RemoteClient;
use crate::resolver::{ConflictResolver, RemoteWins};
use crate::session::{FailureReason, PassOutcome, SyncSession, SyncSummary};
use crate::status::{StatusStream, SyncPhase, SyncStatus};
use offsync_core::LocalStore;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

const COMMAND_CAPACITY: usize = 32;

/// What caused a pass request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// User asked for a sync.
    Manual,
    /// The app came back to the foreground with dirty records.
    Resume,
    /// Connectivity came back.
    Online,
}

enum Command {
    Trigger(Trigger, Option<oneshot::Sender<SyncSummary>>),
    Shutdown(oneshot::Sender<()>),
}

/// Pass scheduling state, kept free of I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Machine {
    pub(crate) running: bool,
    pub(crate) pending: bool,
    /// Consecutive failed passes.
    pub(crate) attempt: u32,
    pub(crate) retry_at: Option<Instant>,
    pub(crate) online: bool,
}

impl Machine {
    pub(crate) fn new(online: bool) -> Self {
        Self {
            running: false,
            pending: false,
            attempt: 0,
            retry_at: None,
            online,
        }
    }

    /// Returns true if a pass should start now.
    pub(crate) fn on_trigger(&mut self, trigger: Trigger) -> bool {
        if trigger == Trigger::Online {
            self.online = true;
            self.attempt = 0;
            self.retry_at = None;
        }
        if self.running {
            self.pending = true;
            return false;
        }
        self.start();
        true
    }

    pub(crate) fn on_offline(&mut self) {
        self.online = false;
        self.retry_at = None;
    }

    /// Returns true if the pending pass should start now.
    pub(crate) fn on_pass_finished(
        &mut self,
        failed: bool,
        retry: &RetryConfig,
        now: Instant,
    ) -> bool {
        self.running = false;
        if failed {
            self.attempt = self.attempt.saturating_add(1);
        } else {
            self.attempt = 0;
        }

        if self.pending {
            self.start();
            return true;
        }

        self.retry_at = if failed && self.online && retry.allows_attempt(self.attempt) {
            Some(now + retry.delay_for_attempt(self.attempt))
        } else {
            None
        };
        false
    }

    /// Returns true if the retry should start now.
    pub(crate) fn on_retry_due(&mut self) -> bool {
        self.retry_at = None;
        if self.running {
            return false;
        }
        self.start();
        true
    }

    fn start(&mut self) {
        self.running = true;
        self.pending = false;
        self.retry_at = None;
    }
}

struct ConnectivityLink {
    monitor: Arc<ConnectivityMonitor>,
    rx: broadcast::Receiver<Connectivity>,
}

struct Driver {
    ctx: Arc<PassContext>,
    machine: Machine,
    commands: mpsc::Receiver<Command>,
    link: Option<ConnectivityLink>,
    current: Option<JoinHandle<SyncSummary>>,
    current_waiters: Vec<oneshot::Sender<SyncSummary>>,
    pending_waiters: Vec<oneshot::Sender<SyncSummary>>,
    passes: u64,
}

async fn next_transition(link: &mut Option<ConnectivityLink>) -> Option<Connectivity> {
    let Some(link) = link else {
        return pending().await;
    };
    match link.rx.recv().await {
        Ok(state) => Some(state),
        Err(RecvError::Lagged(missed)) => {
            debug!(missed, "connectivity events lagged");
            Some(link.monitor.current())
        }
        Err(RecvError::Closed) => None,
    }
}

async fn join_pass(current: &mut Option<JoinHandle<SyncSummary>>) -> Result<SyncSummary, JoinError> {
    match current {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn retry_timer(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

impl Driver {
    async fn run(mut self) {
        let mut stopping: Option<Option<oneshot::Sender<()>>> = None;

        loop {
            let retry_at = self.machine.retry_at;
            tokio::select! {
                command = self.commands.recv(), if stopping.is_none() => match command {
                    Some(Command::Trigger(trigger, waiter)) => self.on_trigger(trigger, waiter),
                    Some(Command::Shutdown(reply)) => {
                        self.commands.close();
                        stopping = Some(Some(reply));
                    }
                    None => stopping = Some(None),
                },
                transition = next_transition(&mut self.link), if stopping.is_none() => match transition {
                    Some(state) => self.on_connectivity(state),
                    None => self.link = None,
                },
                joined = join_pass(&mut self.current) => self.on_pass_finished(joined, stopping.is_some()),
                () = retry_timer(retry_at), if stopping.is_none() => {
                    if self.machine.on_retry_due() {
                        debug!(attempt = self.machine.attempt, "retrying after backoff");
                        self.start_pass();
                    }
                }
            }

            if stopping.is_some() && self.current.is_none() {
                break;
            }
        }

        let passes = self.passes;
        // Release the store before acknowledging, so a caller can reopen it.
        drop(self);
        info!(passes, "sync orchestrator stopped");
        if let Some(Some(reply)) = stopping {
            let _ = reply.send(());
        }
    }

    fn on_trigger(&mut self, trigger: Trigger, waiter: Option<oneshot::Sender<SyncSummary>>) {
        let start = self.machine.on_trigger(trigger);
        debug!(?trigger, start, "sync requested");
        match (start, waiter) {
            (true, Some(w)) => self.current_waiters.push(w),
            (false, Some(w)) => self.pending_waiters.push(w),
            (_, None) => {}
        }
        if start {
            self.start_pass();
        } else {
            self.publish();
        }
    }

    fn on_connectivity(&mut self, state: Connectivity) {
        match state {
            Connectivity::Online if self.machine.online => {}
            Connectivity::Online => self.on_trigger(Trigger::Online, None),
            Connectivity::Offline => {
                self.machine.on_offline();
                self.publish();
            }
        }
    }

    fn start_pass(&mut self) {
        self.passes += 1;
        self.current_waiters.append(&mut self.pending_waiters);
        self.publish();
        self.current = Some(tokio::spawn(run_pass(Arc::clone(&self.ctx), self.passes)));
    }

    fn on_pass_finished(&mut self, joined: Result<SyncSummary, JoinError>, stopping: bool) {
        self.current = None;
        let summary = joined.unwrap_or_else(|e| {
            SyncSession::start(self.passes)
                .finish(PassOutcome::Failed(FailureReason::Internal(e.to_string())))
        });

        let failure = match &summary.outcome {
            PassOutcome::Completed => None,
            PassOutcome::Failed(reason) => Some(reason.clone()),
        };
        let start_next = self.machine.on_pass_finished(
            failure.is_some(),
            &self.ctx.config.retry,
            Instant::now(),
        );
        if let Some(at) = self.machine.retry_at {
            debug!(
                attempt = self.machine.attempt,
                delay_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "retry scheduled"
            );
        }

        if stopping {
            self.machine.running = false;
            self.machine.pending = false;
            self.machine.retry_at = None;
        }

        self.ctx.status.send_modify(|status| {
            status.phase = match &failure {
                None => SyncPhase::Completed(summary.clone()),
                Some(reason) => SyncPhase::Failed(reason.clone()),
            };
            status.last_summary = Some(summary.clone());
            status.last_failure = failure;
        });
        self.publish();

        for waiter in self.current_waiters.drain(..) {
            let _ = waiter.send(summary.clone());
        }

        if start_next && !stopping {
            self.start_pass();
        }
    }

    fn publish(&self) {
        let machine = &self.machine;
        self.ctx.status.send_modify(|status| {
            status.online = machine.online;
            status.pending = machine.pending;
            status.next_retry_at = machine.retry_at;
            status.retry_attempt = machine.attempt;
        });
    }
}

/// Configures and starts a [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    resolver: Arc<dyn ConflictResolver>,
    connectivity: Option<Arc<ConnectivityMonitor>>,
    config: SyncConfig,
}

impl SyncOrchestratorBuilder {
    /// Sets the conflict policy. Defaults to [`RemoteWins`].
    pub fn resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Follows a connectivity monitor: going online triggers a pass and
    /// resets backoff; going offline cancels a scheduled retry.
    pub fn connectivity(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the driver task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(self) -> SyncOrchestrator {
        let online = self
            .connectivity
            .as_ref()
            .map_or(true, |monitor| monitor.is_online());
        let (status_tx, status_rx) = watch::channel(SyncStatus::new(online));
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

        let ctx = Arc::new(PassContext {
            store: Arc::clone(&self.store),
            remote: self.remote,
            resolver: self.resolver,
            config: self.config,
            status: Arc::new(status_tx),
        });
        let link = self.connectivity.map(|monitor| ConnectivityLink {
            rx: monitor.subscribe(),
            monitor,
        });

        let driver = Driver {
            ctx,
            machine: Machine::new(online),
            commands: commands_rx,
            link,
            current: None,
            current_waiters: Vec::new(),
            pending_waiters: Vec::new(),
            passes: 0,
        };
        tokio::spawn(driver.run());
        info!(online, "sync orchestrator started");

        SyncOrchestrator {
            commands: commands_tx,
            status: status_rx,
            store: self.store,
        }
    }
}

/// Drives sync passes between a [`LocalStore`] and a remote.
///
/// Cheap to call from any task; all work happens on the driver task.
/// Dropping the orchestrator lets a running pass finish, then stops the
/// driver.
pub struct SyncOrchestrator {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
    store: Arc<LocalStore>,
}

impl SyncOrchestrator {
    /// Starts configuring an orchestrator for `store` and `remote`.
    pub fn builder(
        store: Arc<LocalStore>,
        remote: impl RemoteClient + 'static,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            store,
            remote: Arc::new(remote),
            resolver: Arc::new(RemoteWins),
            connectivity: None,
            config: SyncConfig::default(),
        }
    }

    /// Requests a pass without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] after shutdown.
    pub fn trigger(&self) -> SyncResult<()> {
        self.send_trigger(Trigger::Manual)
    }

    /// Requests a pass and waits for its summary.
    ///
    /// If a pass is already running, waits for the pass after it, so the
    /// summary always reflects writes made before this call.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Stopped`] if the orchestrator shuts down first.
    pub async fn sync_now(&self) -> SyncResult<SyncSummary> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Trigger(Trigger::Manual, Some(tx)))
            .await
            .map_err(|_| SyncError::Stopped)?;
        rx.await.map_err(|_| SyncError::Stopped)
    }

    /// Tells the orchestrator the app returned to the foreground. Starts a
    /// pass if any record is dirty; returns whether it did.
    ///
    /// # Errors
    ///
    /// Returns a store error if the dirty count cannot be read, or
    /// [`SyncError::Stopped`].
    pub fn notify_resumed(&self) -> SyncResult<bool> {
        if self.store.dirty_count()? == 0 {
            return Ok(false);
        }
        self.send_trigger(Trigger::Resume)?;
        Ok(true)
    }

    /// The latest status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status updates, starting with the current one.
    pub fn subscribe(&self) -> StatusStream {
        StatusStream::new(self.status.clone())
    }

    /// The local store being synced.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Stops the driver after the running pass, if any, completes.
    ///
    /// Queued triggers and scheduled retries are dropped.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    fn send_trigger(&self, trigger: Trigger) -> SyncResult<()> {
        match self.commands.try_send(Command::Trigger(trigger, None)) {
            // A full queue already holds a trigger that will coalesce with
            // this one.
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::Stopped),
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}
