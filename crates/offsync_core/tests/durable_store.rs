//! Durable local store: reopen and crash recovery.

use offsync_core::{
    Cursor, LocalStore, LogRecordStore, RecordStore, RemoteVersion, StoreConfig, StoreError, SyncState,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

#[test]
fn lifecycle_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.log");
    let config = StoreConfig::default();

    let (kept, deleted, synced) = {
        let store = LocalStore::open_file(&path, &config).unwrap();
        let kept = store.create(b"kept".to_vec()).unwrap();
        let deleted = store.create(b"deleted".to_vec()).unwrap();
        let synced = store.create(b"synced".to_vec()).unwrap();
        store.delete(&deleted.id).unwrap();
        store
            .mark_synced(&synced.id, RemoteVersion::new("v1"))
            .unwrap();
        store.set_cursor(&Cursor::new("17")).unwrap();
        store.flush().unwrap();
        (kept, deleted, synced)
    };

    let store = LocalStore::open_file(&path, &config).unwrap();
    assert_eq!(store.get(&kept.id).unwrap(), kept);
    assert_eq!(
        store.get(&deleted.id).unwrap().sync_state,
        SyncState::PendingDeletion
    );
    let synced_now = store.get(&synced.id).unwrap();
    assert_eq!(synced_now.sync_state, SyncState::Synced);
    assert_eq!(synced_now.remote_version, Some(RemoteVersion::new("v1")));
    assert_eq!(store.cursor().unwrap().as_str(), "17");
    assert_eq!(store.dirty_count().unwrap(), 2);
}

#[test]
fn second_open_is_locked_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.log");
    let _first = LocalStore::open_file(&path, &StoreConfig::default()).unwrap();

    match LocalStore::open_file(&path, &StoreConfig::default()) {
        Err(StoreError::Locked(lock)) => assert!(lock.to_string_lossy().ends_with(".lock")),
        other => panic!("expected Locked, got {other:?}"),
    }
}

#[test]
fn interrupted_append_is_dropped_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.log");
    let config = StoreConfig::default();

    let record = {
        let store = LocalStore::open_file(&path, &config).unwrap();
        store.create(b"durable".to_vec()).unwrap()
    };
    let intact_len = std::fs::metadata(&path).unwrap().len();

    // Half a frame header, as left by a crash mid-write.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"OSRL\x01").unwrap();
    drop(file);

    let log = LogRecordStore::open_file(&path, &config).unwrap();
    assert_eq!(log.load(&record.id).unwrap(), Some(record));
    assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
}

#[test]
fn damaged_frame_length_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.log");
    let config = StoreConfig::default();

    let ids: Vec<_> = {
        let store = LocalStore::open_file(&path, &config).unwrap();
        (0..3u8)
            .map(|n| store.create(vec![n; 16]).unwrap().id)
            .collect()
    };
    let original = std::fs::read(&path).unwrap();

    // Length field of the first frame.
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(7)).unwrap();
    file.write_all(&0x0FFF_FFFFu32.to_le_bytes()).unwrap();
    drop(file);

    match LocalStore::open_file(&path, &config) {
        Err(StoreError::Corrupted { offset: 0, .. }) => {}
        other => panic!("expected Corrupted, got {other:?}"),
    }
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        original.len() as u64
    );

    // Nothing was cut off, so repairing the header recovers every record.
    std::fs::write(&path, &original).unwrap();
    let store = LocalStore::open_file(&path, &config).unwrap();
    for id in &ids {
        assert!(store.find(id).unwrap().is_some());
    }
}

#[test]
fn compaction_preserves_store_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.log");
    let config = StoreConfig::default().with_sync_on_write(false);

    let log = LogRecordStore::open_file(&path, &config).unwrap();
    let store_view: Vec<_> = {
        let store = LocalStore::with_config(log, &config);
        let record = store.create(b"0".to_vec()).unwrap();
        for n in 1..20u8 {
            store.update(&record.id, vec![n]).unwrap();
        }
        store.flush().unwrap();
        store.list().unwrap()
    };

    let log = LogRecordStore::open_file(&path, &config).unwrap();
    let stats = log.compact().unwrap();
    assert_eq!(stats.frames_before, 20);
    assert_eq!(stats.frames_after, 1);
    drop(log);

    let store = LocalStore::open_file(&path, &config).unwrap();
    assert_eq!(store.list().unwrap(), store_view);
}
