//! One sync pass: upload, download, reconcile.
//!
//! Store and remote calls are blocking; each one runs on a worker thread via
//! `spawn_blocking`. Remote calls are additionally bounded by the request
//! timeout. Every decision that writes a record is taken under that record's
//! lock after re-reading it, so an edit landing mid-pass is never lost.

use crate::config::SyncConfig;
use crate::remote::{PushOutcome, RemoteClient, TransportFailure};
use crate::resolver::{ConflictResolver, Resolution};
use crate::session::{FailureKind, FailureReason, PassOutcome, SyncSession, SyncSummary};
use crate::status::{SyncPhase, SyncStatus};
use offsync_core::{Cursor, LocalStore, Record, RecordGuard, RecordId, StoreResult, SyncState};
use offsync_protocol::{PushRequest, RemoteRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Everything a pass needs; shared by all passes of one orchestrator.
pub(crate) struct PassContext {
    pub(crate) store: Arc<LocalStore>,
    pub(crate) remote: Arc<dyn RemoteClient>,
    pub(crate) resolver: Arc<dyn ConflictResolver>,
    pub(crate) config: SyncConfig,
    pub(crate) status: Arc<watch::Sender<SyncStatus>>,
}

impl PassContext {
    fn enter(&self, phase: SyncPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }
}

/// What reconciling one remote record did locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reconciled {
    /// Local already reflects this remote version.
    Unchanged,
    /// Remote content (or deletion) written locally.
    Applied,
    /// Both sides changed; the resolver decided.
    Resolved(Resolution),
}

/// Brings one record in line with `remote`, asking `resolver` when both
/// sides changed. The caller holds the record's lock.
pub(crate) fn reconcile(
    guard: &RecordGuard<'_>,
    remote: &RemoteRecord,
    resolver: &dyn ConflictResolver,
) -> StoreResult<Reconciled> {
    let Some(local) = guard.find()? else {
        if remote.deleted {
            return Ok(Reconciled::Unchanged);
        }
        apply(guard, remote)?;
        return Ok(Reconciled::Applied);
    };

    if local.remote_version.as_ref() == Some(&remote.version) {
        return Ok(Reconciled::Unchanged);
    }

    match local.sync_state {
        SyncState::Synced => {
            apply(guard, remote)?;
            Ok(Reconciled::Applied)
        }
        SyncState::PendingDeletion if remote.deleted => {
            guard.apply_remote_deletion()?;
            Ok(Reconciled::Applied)
        }
        _ => {
            let resolution = resolver.resolve(&local, remote);
            debug!(id = %local.id, local = %local.sync_state, remote = %remote.version, ?resolution, "conflict");
            match &resolution {
                Resolution::KeepRemote => apply(guard, remote)?,
                Resolution::KeepLocal => {
                    guard.rebase(remote.version.clone())?;
                }
                Resolution::Merge(payload) => {
                    guard.replace_dirty(payload.clone(), remote.version.clone())?;
                }
            }
            Ok(Reconciled::Resolved(resolution))
        }
    }
}

fn apply(guard: &RecordGuard<'_>, remote: &RemoteRecord) -> StoreResult<()> {
    if remote.deleted {
        guard.apply_remote_deletion()
    } else {
        guard
            .apply_remote(remote.payload.clone(), remote.version.clone(), remote.updated_at)
            .map(|_| ())
    }
}

/// Runs a blocking remote call on a worker thread under `timeout`.
pub(crate) async fn call<T, F>(timeout: Duration, f: F) -> Result<T, TransportFailure>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransportFailure> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(TransportFailure::network(format!(
            "remote call worker failed: {join}"
        ))),
        Err(_) => Err(TransportFailure::timeout(timeout)),
    }
}

/// Runs a blocking store operation on a worker thread.
async fn blocking<T, F>(f: F) -> Result<T, FailureReason>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FailureReason::Internal(e.to_string()))
}

enum RemoteAnswer {
    Pushed(PushOutcome),
    Deleted,
}

enum Settled {
    Uploaded,
    Deleted,
    Resolved(Reconciled),
}

enum UploadResult {
    Settled(RecordId, Settled),
    TransportFailed(RecordId, TransportFailure),
    Failed(RecordId, FailureKind, String),
    Skipped(RecordId),
}

/// Applies the remote's answer for `sent` under the record's lock.
fn settle(
    store: &LocalStore,
    resolver: &dyn ConflictResolver,
    sent: &Record,
    answer: RemoteAnswer,
) -> StoreResult<Settled> {
    let guard = store.lock(&sent.id);
    let current = guard.find()?;

    match answer {
        RemoteAnswer::Pushed(PushOutcome::Ack(version)) => {
            match current {
                Some(c) if c.sync_state == SyncState::PendingUpload && c.updated_at == sent.updated_at => {
                    guard.mark_synced(version)?;
                }
                Some(c) if c.sync_state.is_dirty() => {
                    // Edited while in flight: keep the edit, based on what
                    // the remote now holds.
                    debug!(id = %sent.id, "record changed during upload");
                    guard.rebase(version)?;
                }
                _ => {}
            }
            Ok(Settled::Uploaded)
        }
        RemoteAnswer::Pushed(PushOutcome::Reject(remote)) => {
            Ok(Settled::Resolved(reconcile(&guard, &remote, resolver)?))
        }
        RemoteAnswer::Deleted => {
            if current.is_some_and(|c| c.sync_state == SyncState::PendingDeletion) {
                guard.purge()?;
            }
            Ok(Settled::Deleted)
        }
    }
}

/// Runs one full pass and returns its summary.
pub(crate) async fn run_pass(ctx: Arc<PassContext>, pass: u64) -> SyncSummary {
    let mut session = SyncSession::start(pass);
    info!(pass, "sync pass started");

    let outcome = match drive(&ctx, &mut session).await {
        Ok(None) => PassOutcome::Completed,
        Ok(Some(failure)) => PassOutcome::Failed(FailureReason::Transport(failure)),
        Err(reason) => PassOutcome::Failed(reason),
    };

    let summary = session.finish(outcome);
    match &summary.outcome {
        PassOutcome::Completed => info!(
            pass,
            uploaded = summary.uploaded,
            downloaded = summary.downloaded,
            conflicted = summary.conflicted,
            duration_ms = summary.duration.as_millis() as u64,
            "sync pass completed"
        ),
        PassOutcome::Failed(reason) => warn!(
            pass,
            uploaded = summary.uploaded,
            failed = summary.failed.len(),
            skipped = summary.skipped,
            %reason,
            "sync pass failed"
        ),
    }
    summary
}

/// Returns the upload transport failure, if uploads were cut short but the
/// rest of the pass went through.
async fn drive(
    ctx: &Arc<PassContext>,
    session: &mut SyncSession,
) -> Result<Option<TransportFailure>, FailureReason> {
    ctx.enter(SyncPhase::Uploading);
    let upload_failure = upload(ctx, session).await?;
    if let Some(failure) = &upload_failure {
        if session.success_count() == 0 {
            return Err(FailureReason::Transport(failure.clone()));
        }
    }

    ctx.enter(SyncPhase::Downloading);
    let store = Arc::clone(&ctx.store);
    let from = blocking(move || store.cursor())
        .await?
        .map_err(|e| FailureReason::Storage(e.to_string()))?;
    let (records, cursor) = download(ctx, from).await.map_err(FailureReason::Transport)?;

    ctx.enter(SyncPhase::Reconciling);
    reconcile_all(ctx, session, records).await?;

    let store = Arc::clone(&ctx.store);
    blocking(move || {
        store.set_cursor(&cursor)?;
        store.flush()
    })
    .await?
    .map_err(|e| FailureReason::Storage(e.to_string()))?;
    debug!(pass = session.pass(), "cursor committed");

    Ok(upload_failure)
}

async fn upload(
    ctx: &Arc<PassContext>,
    session: &mut SyncSession,
) -> Result<Option<TransportFailure>, FailureReason> {
    let store = Arc::clone(&ctx.store);
    let dirty = blocking(move || -> StoreResult<Vec<Record>> {
        let mut records = store.list_by_sync_state(SyncState::PendingUpload)?;
        records.extend(store.list_by_sync_state(SyncState::PendingDeletion)?);
        Ok(records)
    })
    .await?
    .map_err(|e| FailureReason::Storage(e.to_string()))?;

    if dirty.is_empty() {
        return Ok(None);
    }
    debug!(pass = session.pass(), records = dirty.len(), "uploading");

    let permits = Arc::new(Semaphore::new(ctx.config.upload_concurrency.max(1)));
    let abort = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for record in dirty {
        session.attempt(record.id);
        let ctx = Arc::clone(ctx);
        let permits = Arc::clone(&permits);
        let abort = Arc::clone(&abort);
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return UploadResult::Skipped(record.id);
            };
            if abort.load(Ordering::SeqCst) {
                return UploadResult::Skipped(record.id);
            }
            upload_one(&ctx, record, &abort).await
        });
    }

    let mut failure = None;
    let mut skipped = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(|e| FailureReason::Internal(e.to_string()))? {
            UploadResult::Settled(id, Settled::Uploaded) => session.uploaded(id),
            UploadResult::Settled(id, Settled::Deleted) => session.succeed(id),
            UploadResult::Settled(id, Settled::Resolved(reconciled)) => {
                if let Reconciled::Resolved(resolution) = &reconciled {
                    session.conflicted();
                    if *resolution == Resolution::KeepRemote {
                        session.downloaded();
                    }
                }
                session.succeed(id);
            }
            UploadResult::TransportFailed(id, f) => {
                session.fail(id, FailureKind::from(&f));
                failure.get_or_insert(f);
            }
            UploadResult::Failed(id, kind, message) => {
                warn!(%id, error = %message, "could not record upload result");
                session.fail(id, kind);
            }
            UploadResult::Skipped(id) => skipped.push(id),
        }
    }

    // Records cut off by the abort failed for the same reason as the one
    // that tripped it.
    session.skipped(skipped.len());
    let kind = failure
        .as_ref()
        .map_or(FailureKind::Transport, FailureKind::from);
    for id in skipped {
        session.fail(id, kind);
    }
    Ok(failure)
}

async fn upload_one(ctx: &Arc<PassContext>, record: Record, abort: &AtomicBool) -> UploadResult {
    let id = record.id;
    let remote = Arc::clone(&ctx.remote);
    let timeout = ctx.config.request_timeout;

    // A record never acknowledged may still exist remotely if an ack was
    // lost, so deletions always go out.
    let answer = if record.sync_state == SyncState::PendingDeletion {
        call(timeout, move || remote.delete(&id).map(|()| RemoteAnswer::Deleted)).await
    } else {
        let request = PushRequest::from_record(&record);
        call(timeout, move || remote.push(&request).map(RemoteAnswer::Pushed)).await
    };

    let answer = match answer {
        Ok(answer) => answer,
        Err(failure) => {
            abort.store(true, Ordering::SeqCst);
            warn!(%id, %failure, "upload failed, aborting upload phase");
            return UploadResult::TransportFailed(id, failure);
        }
    };

    let store = Arc::clone(&ctx.store);
    let resolver = Arc::clone(&ctx.resolver);
    match blocking(move || settle(&store, resolver.as_ref(), &record, answer)).await {
        Ok(Ok(settled)) => UploadResult::Settled(id, settled),
        Ok(Err(e)) => UploadResult::Failed(id, FailureKind::from(&e), e.to_string()),
        Err(reason) => UploadResult::Failed(id, FailureKind::Storage, reason.to_string()),
    }
}

/// Fetches every page after `cursor`. Returns the records and the cursor to
/// commit once they are applied.
async fn download(
    ctx: &Arc<PassContext>,
    mut cursor: Cursor,
) -> Result<(Vec<RemoteRecord>, Cursor), TransportFailure> {
    let mut records = Vec::new();
    loop {
        let remote = Arc::clone(&ctx.remote);
        let from = cursor.clone();
        let limit = ctx.config.page_size;
        let page = call(ctx.config.request_timeout, move || {
            remote.fetch_changes_since(&from, limit)
        })
        .await?;

        debug!(from = %cursor, records = page.records.len(), has_more = page.has_more, "fetched changes");
        records.extend(page.records);
        cursor = page.next_cursor;
        if !page.has_more {
            break;
        }
    }
    Ok((records, cursor))
}

async fn reconcile_all(
    ctx: &Arc<PassContext>,
    session: &mut SyncSession,
    records: Vec<RemoteRecord>,
) -> Result<(), FailureReason> {
    if records.is_empty() {
        return Ok(());
    }

    let store = Arc::clone(&ctx.store);
    let resolver = Arc::clone(&ctx.resolver);
    let results = blocking(move || {
        records
            .iter()
            .map(|remote| {
                let guard = store.lock(&remote.id);
                (remote.id, reconcile(&guard, remote, resolver.as_ref()))
            })
            .collect::<Vec<_>>()
    })
    .await?;

    let mut storage_failure = None;
    for (id, result) in results {
        match result {
            Ok(Reconciled::Unchanged) => {}
            Ok(Reconciled::Applied) => session.downloaded(),
            Ok(Reconciled::Resolved(resolution)) => {
                session.conflicted();
                if resolution == Resolution::KeepRemote {
                    session.downloaded();
                }
                session.succeed(id);
            }
            Err(e) => {
                warn!(%id, error = %e, "could not apply remote record");
                session.fail(id, FailureKind::from(&e));
                storage_failure.get_or_insert_with(|| e.to_string());
            }
        }
    }

    match storage_failure {
        Some(message) => Err(FailureReason::Storage(message)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemote;
    use crate::resolver::{LocalWins, RemoteWins};
    use offsync_core::{RemoteVersion, Timestamp};
    use offsync_protocol::ChangesPage;
    use std::sync::atomic::AtomicUsize;

    fn remote(id: RecordId, payload: &[u8], version: &str) -> RemoteRecord {
        RemoteRecord {
            id,
            payload: payload.to_vec(),
            version: RemoteVersion::new(version),
            updated_at: Timestamp::from_millis(1),
            deleted: false,
        }
    }

    fn synced(store: &LocalStore, payload: &[u8], version: &str) -> Record {
        let record = store.create(payload.to_vec()).unwrap();
        store
            .mark_synced(&record.id, RemoteVersion::new(version))
            .unwrap()
    }

    #[test]
    fn unknown_remote_record_is_applied() {
        let store = LocalStore::in_memory();
        let id = RecordId::new();
        let guard = store.lock(&id);
        let result = reconcile(&guard, &remote(id, b"r", "v1"), &RemoteWins).unwrap();
        drop(guard);

        assert_eq!(result, Reconciled::Applied);
        let record = store.get(&id).unwrap();
        assert_eq!(record.sync_state, SyncState::Synced);
        assert_eq!(record.payload, b"r");
    }

    #[test]
    fn unknown_tombstone_is_ignored() {
        let store = LocalStore::in_memory();
        let id = RecordId::new();
        let mut tombstone = remote(id, b"", "v2");
        tombstone.deleted = true;
        let result = reconcile(&store.lock(&id), &tombstone, &RemoteWins).unwrap();
        assert_eq!(result, Reconciled::Unchanged);
        assert!(store.find(&id).unwrap().is_none());
    }

    #[test]
    fn same_version_is_unchanged() {
        let store = LocalStore::in_memory();
        let record = synced(&store, b"a", "v1");
        let result = reconcile(&store.lock(&record.id), &remote(record.id, b"a", "v1"), &RemoteWins)
            .unwrap();
        assert_eq!(result, Reconciled::Unchanged);
    }

    #[test]
    fn synced_record_follows_remote() {
        let store = LocalStore::in_memory();
        let record = synced(&store, b"a", "v1");
        let mut tombstone = remote(record.id, b"", "v2");
        tombstone.deleted = true;

        let result = reconcile(&store.lock(&record.id), &tombstone, &RemoteWins).unwrap();
        assert_eq!(result, Reconciled::Applied);
        assert!(store.find(&record.id).unwrap().is_none());
    }

    #[test]
    fn dirty_record_consults_resolver() {
        let store = LocalStore::in_memory();
        let record = synced(&store, b"a", "v1");
        store.update(&record.id, b"mine".to_vec()).unwrap();

        let result =
            reconcile(&store.lock(&record.id), &remote(record.id, b"theirs", "v3"), &LocalWins)
                .unwrap();
        assert_eq!(result, Reconciled::Resolved(Resolution::KeepLocal));
        let local = store.get(&record.id).unwrap();
        assert_eq!(local.payload, b"mine");
        assert_eq!(local.sync_state, SyncState::PendingUpload);
        assert_eq!(local.remote_version, Some(RemoteVersion::new("v3")));
    }

    #[test]
    fn merge_stays_dirty_on_remote_base() {
        let store = LocalStore::in_memory();
        let record = synced(&store, b"a", "v1");
        store.update(&record.id, b"mine".to_vec()).unwrap();
        let merge = |_: &Record, _: &RemoteRecord| Resolution::Merge(b"both".to_vec());

        reconcile(&store.lock(&record.id), &remote(record.id, b"theirs", "v3"), &merge).unwrap();
        let local = store.get(&record.id).unwrap();
        assert_eq!(local.payload, b"both");
        assert_eq!(local.sync_state, SyncState::PendingUpload);
        assert_eq!(local.remote_version, Some(RemoteVersion::new("v3")));
    }

    #[test]
    fn deletion_on_both_sides_purges() {
        let store = LocalStore::in_memory();
        let record = synced(&store, b"a", "v1");
        store.delete(&record.id).unwrap();
        let mut tombstone = remote(record.id, b"", "v2");
        tombstone.deleted = true;

        let result = reconcile(&store.lock(&record.id), &tombstone, &LocalWins).unwrap();
        assert_eq!(result, Reconciled::Applied);
        assert!(store.find(&record.id).unwrap().is_none());
    }

    #[test]
    fn ack_after_concurrent_edit_rebases() {
        let store = LocalStore::in_memory();
        let sent = store.create(b"first".to_vec()).unwrap();
        store.update(&sent.id, b"second".to_vec()).unwrap();

        let settled = settle(
            &store,
            &RemoteWins,
            &sent,
            RemoteAnswer::Pushed(PushOutcome::Ack(RemoteVersion::new("v1"))),
        )
        .unwrap();
        assert!(matches!(settled, Settled::Uploaded));
        let local = store.get(&sent.id).unwrap();
        assert_eq!(local.payload, b"second");
        assert_eq!(local.sync_state, SyncState::PendingUpload);
        assert_eq!(local.remote_version, Some(RemoteVersion::new("v1")));
    }

    #[test]
    fn delete_ack_purges() {
        let store = LocalStore::in_memory();
        let record = synced(&store, b"a", "v1");
        let sent = store.delete(&record.id).unwrap();
        settle(&store, &RemoteWins, &sent, RemoteAnswer::Deleted).unwrap();
        assert!(store.find(&record.id).unwrap().is_none());
    }

    /// Lets `budget` pushes through, then fails every push with a network
    /// error.
    struct PushBudget {
        inner: MockRemote,
        budget: AtomicUsize,
    }

    impl RemoteClient for PushBudget {
        fn push(&self, request: &PushRequest) -> Result<PushOutcome, TransportFailure> {
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(TransportFailure::network("connection reset"));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.push(request)
        }

        fn delete(&self, id: &RecordId) -> Result<(), TransportFailure> {
            self.inner.delete(id)
        }

        fn fetch_changes_since(
            &self,
            cursor: &Cursor,
            limit: u32,
        ) -> Result<ChangesPage, TransportFailure> {
            self.inner.fetch_changes_since(cursor, limit)
        }
    }

    fn context(store: &Arc<LocalStore>, remote: Arc<dyn RemoteClient>) -> Arc<PassContext> {
        let (status, _) = watch::channel(SyncStatus::new(true));
        Arc::new(PassContext {
            store: Arc::clone(store),
            remote,
            resolver: Arc::new(RemoteWins),
            config: SyncConfig::new().with_upload_concurrency(1),
            status: Arc::new(status),
        })
    }

    fn dirty_records(store: &LocalStore, count: u8) -> Vec<RecordId> {
        (0..count)
            .map(|n| store.create(vec![n]).unwrap().id)
            .collect()
    }

    #[tokio::test]
    async fn upload_abort_without_success_skips_download() {
        let store = Arc::new(LocalStore::in_memory());
        let ids = dirty_records(&store, 3);
        let remote = Arc::new(MockRemote::new());
        remote.fail_next_push(TransportFailure::network("connection reset"));

        let summary = run_pass(context(&store, remote.clone()), 1).await;

        assert!(matches!(
            summary.outcome,
            PassOutcome::Failed(FailureReason::Transport(_))
        ));
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed.len(), 3);
        for id in &ids {
            assert_eq!(summary.failed.get(id), Some(&FailureKind::Transport));
        }
        assert_eq!(remote.push_calls(), 1);
        assert_eq!(remote.fetch_calls(), 0);
        assert_eq!(store.dirty_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn upload_abort_after_success_still_downloads() {
        let store = Arc::new(LocalStore::in_memory());
        dirty_records(&store, 3);
        let inner = MockRemote::new();
        let theirs = inner.put_remote(RecordId::new(), b"from elsewhere".to_vec());
        let remote = Arc::new(PushBudget {
            inner,
            budget: AtomicUsize::new(1),
        });

        let summary = run_pass(context(&store, remote), 1).await;

        assert!(matches!(
            summary.outcome,
            PassOutcome::Failed(FailureReason::Transport(_))
        ));
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed.len(), 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.dirty_count().unwrap(), 2);

        let applied = store.get(&theirs.id).unwrap();
        assert_eq!(applied.sync_state, SyncState::Synced);
        assert_eq!(applied.payload, b"from elsewhere");
        assert!(!store.cursor().unwrap().is_origin());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_uploads_and_cursor() {
        let store = Arc::new(LocalStore::in_memory());
        let ids = dirty_records(&store, 2);
        let remote = Arc::new(MockRemote::new());
        remote.fail_next_fetch(TransportFailure::network("dropped"));

        let summary = run_pass(context(&store, remote.clone()), 1).await;

        assert!(matches!(
            summary.outcome,
            PassOutcome::Failed(FailureReason::Transport(_))
        ));
        assert_eq!(summary.uploaded, 2);
        assert!(summary.failed.is_empty());
        for id in &ids {
            assert_eq!(store.get(id).unwrap().sync_state, SyncState::Synced);
        }
        assert!(store.cursor().unwrap().is_origin());
        assert_eq!(remote.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn call_times_out() {
        let result: Result<(), _> = call(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().is_timeout());
    }
}
