//! Durable, append-only record log.
//!
//! Every write appends one self-delimiting frame:
//!
//! ```text
//! | magic "OSRL" (4) | version u16 | kind u8 | len u32 | header crc32 (4) | CBOR payload | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The header CRC covers the eleven bytes
//! before it; the trailing CRC covers everything before it. On open the log
//! is replayed into an in-memory index. Only a short header, or an intact
//! header whose body runs past the end of the log, counts as the remains of
//! an interrupted append and is cut off. Any other damage is reported as
//! corruption and the log is left untouched.

use super::RecordStore;
use crate::codec;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::id::RecordId;
use crate::record::{Cursor, Record};
use fs2::FileExt;
use offsync_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAGIC: [u8; 4] = *b"OSRL";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 15;
const HEADER_CRC_AT: usize = 11;
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameKind {
    Put = 1,
    Remove = 2,
    Cursor = 3,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            3 => Some(Self::Cursor),
            _ => None,
        }
    }
}

enum Frame<'a> {
    Put(&'a Record),
    Remove(&'a RecordId),
    Cursor(&'a Cursor),
}

impl Frame<'_> {
    fn kind(&self) -> FrameKind {
        match self {
            Frame::Put(_) => FrameKind::Put,
            Frame::Remove(_) => FrameKind::Remove,
            Frame::Cursor(_) => FrameKind::Cursor,
        }
    }

    fn encode(&self) -> StoreResult<Vec<u8>> {
        let payload = match self {
            Frame::Put(record) => codec::encode(record)?,
            Frame::Remove(id) => codec::encode(id)?,
            Frame::Cursor(cursor) => codec::encode(cursor)?,
        };
        let len = u32::try_from(payload.len())
            .map_err(|_| StoreError::codec(format!("frame of {} bytes", payload.len())))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.push(self.kind() as u8);
        buf.extend_from_slice(&len.to_le_bytes());
        let header_crc = compute_crc32(&buf);
        buf.extend_from_slice(&header_crc.to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }
}

/// CRC-32 (IEEE).
fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// What a compaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionStats {
    /// Live records carried over.
    pub live_records: usize,
    /// Frames in the log before compaction.
    pub frames_before: u64,
    /// Frames in the compacted log.
    pub frames_after: u64,
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
}

impl CompactionStats {
    /// Bytes freed by the compaction.
    pub fn reclaimed_bytes(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

struct LogState<B> {
    backend: B,
    index: HashMap<RecordId, Record>,
    cursor: Cursor,
    frames: u64,
}

impl<B: StorageBackend> LogState<B> {
    fn append(&mut self, frame: &Frame<'_>, sync_on_write: bool) -> StoreResult<()> {
        let bytes = frame.encode()?;
        let offset = self.backend.append(&bytes)?;
        if sync_on_write {
            if let Err(err) = self.backend.flush() {
                // Not durable, so not applied: drop the frame again.
                let _ = self.backend.truncate(offset);
                return Err(err.into());
            }
        }
        self.frames += 1;
        Ok(())
    }
}

/// Holds the advisory lock that keeps a second process off the same log.
struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    fn acquire(path: PathBuf) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path));
        }
        Ok(Self { path, _file: file })
    }
}

/// A [`RecordStore`] persisted as an append-only log over a
/// [`StorageBackend`].
///
/// The whole live set is indexed in memory. The index changes only after
/// the frame describing the change has been appended (and flushed, with
/// `sync_on_write`), so a failed write leaves both the log and the index as
/// they were.
pub struct LogRecordStore<B: StorageBackend> {
    state: Mutex<LogState<B>>,
    sync_on_write: bool,
    lock: Option<FileLock>,
}

impl<B: StorageBackend> LogRecordStore<B> {
    /// Opens a log over `backend`, replaying every frame in it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] or [`StoreError::ChecksumMismatch`]
    /// if a complete frame is damaged, or a storage error.
    pub fn open(mut backend: B, config: &StoreConfig) -> StoreResult<Self> {
        let size = backend.size()?;
        let mut offset = 0u64;
        let mut index = HashMap::new();
        let mut cursor = Cursor::origin();
        let mut frames = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < HEADER_LEN as u64 {
                break;
            }

            let header = backend.read_at(offset, HEADER_LEN)?;
            if header[..4] != MAGIC {
                return Err(StoreError::Corrupted {
                    offset,
                    message: "bad frame magic".into(),
                });
            }
            if read_u32(&header, HEADER_CRC_AT) != compute_crc32(&header[..HEADER_CRC_AT]) {
                return Err(StoreError::Corrupted {
                    offset,
                    message: "frame header checksum mismatch".into(),
                });
            }
            let version = u16::from_le_bytes([header[4], header[5]]);
            if version != FORMAT_VERSION {
                return Err(StoreError::Corrupted {
                    offset,
                    message: format!("unsupported frame version {version}"),
                });
            }
            let kind = header[6];
            let len = read_u32(&header, 7) as usize;
            let frame_len = (HEADER_LEN + len + TRAILER_LEN) as u64;
            if remaining < frame_len {
                // Intact header, short body: the last append never finished.
                break;
            }

            let frame = backend.read_at(offset, frame_len as usize)?;
            let body_end = HEADER_LEN + len;
            let expected = read_u32(&frame, body_end);
            let actual = compute_crc32(&frame[..body_end]);
            if expected != actual {
                return Err(StoreError::ChecksumMismatch {
                    offset,
                    expected,
                    actual,
                });
            }

            let payload = &frame[HEADER_LEN..body_end];
            match FrameKind::from_byte(kind) {
                Some(FrameKind::Put) => {
                    let record: Record = codec::decode(payload)?;
                    index.insert(record.id, record);
                }
                Some(FrameKind::Remove) => {
                    let id: RecordId = codec::decode(payload)?;
                    index.remove(&id);
                }
                Some(FrameKind::Cursor) => {
                    cursor = codec::decode(payload)?;
                }
                None => {
                    return Err(StoreError::Corrupted {
                        offset,
                        message: format!("unknown frame kind {kind}"),
                    });
                }
            }

            frames += 1;
            offset += frame_len;
        }

        if offset < size {
            warn!(
                offset,
                dropped = size - offset,
                "truncating incomplete frame at end of record log"
            );
            backend.truncate(offset)?;
        }

        debug!(frames, records = index.len(), "record log replayed");

        Ok(Self {
            state: Mutex::new(LogState {
                backend,
                index,
                cursor,
                frames,
            }),
            sync_on_write: config.sync_on_write,
            lock: None,
        })
    }

    /// Number of frames in the log, live or superseded.
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frames
    }

    /// Number of live records.
    pub fn live_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot report its size.
    pub fn size_bytes(&self) -> StoreResult<u64> {
        Ok(self.state.lock().backend.size()?)
    }

    /// Writes the live set and cursor into `target` as a fresh log and opens
    /// it.
    ///
    /// `self` is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if writing `target` fails.
    pub fn compact_into<C: StorageBackend>(
        &self,
        mut target: C,
    ) -> StoreResult<(LogRecordStore<C>, CompactionStats)> {
        let state = self.state.lock();
        let frames_after = write_snapshot(&state.index, &state.cursor, &mut target)?;
        let stats = CompactionStats {
            live_records: state.index.len(),
            frames_before: state.frames,
            frames_after,
            bytes_before: state.backend.size()?,
            bytes_after: target.size()?,
        };

        let compacted = LogRecordStore {
            state: Mutex::new(LogState {
                backend: target,
                index: state.index.clone(),
                cursor: state.cursor.clone(),
                frames: frames_after,
            }),
            sync_on_write: self.sync_on_write,
            lock: None,
        };
        Ok((compacted, stats))
    }
}

fn write_snapshot<C: StorageBackend>(
    index: &HashMap<RecordId, Record>,
    cursor: &Cursor,
    target: &mut C,
) -> StoreResult<u64> {
    let mut records: Vec<&Record> = index.values().collect();
    records.sort_by_key(|r| r.id);

    let mut frames = 0u64;
    for record in records {
        target.append(&Frame::Put(record).encode()?)?;
        frames += 1;
    }
    if !cursor.is_origin() {
        target.append(&Frame::Cursor(cursor).encode()?)?;
        frames += 1;
    }
    target.flush()?;
    target.sync()?;
    Ok(frames)
}

impl LogRecordStore<FileBackend> {
    /// Opens (or creates) a record log file and locks it against other
    /// processes.
    ///
    /// The lock is held on a sibling `<path>.lock` file for as long as the
    /// store is alive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process has the log open,
    /// or any error from [`LogRecordStore::open`].
    pub fn open_file(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let lock = FileLock::acquire(sibling(path, "lock"))?;
        let backend = FileBackend::open(path)?;
        let mut store = Self::open(backend, config)?;
        store.lock = Some(lock);
        info!(path = %path.display(), records = store.live_count(), "record log opened");
        Ok(store)
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> PathBuf {
        self.state.lock().backend.path().to_path_buf()
    }

    /// Rewrites the log file with only the live set.
    ///
    /// The compacted log is written next to the original and renamed over
    /// it, so a crash mid-compaction leaves the old log intact.
    ///
    /// # Errors
    ///
    /// Returns an I/O or storage error; the current log stays in use.
    pub fn compact(&self) -> StoreResult<CompactionStats> {
        let mut state = self.state.lock();
        let path = state.backend.path().to_path_buf();
        let tmp = sibling(&path, "compact");
        if tmp.exists() {
            std::fs::remove_file(&tmp)?;
        }

        let mut fresh = FileBackend::open(&tmp)?;
        let frames_after = write_snapshot(&state.index, &state.cursor, &mut fresh)?;
        let stats = CompactionStats {
            live_records: state.index.len(),
            frames_before: state.frames,
            frames_after,
            bytes_before: state.backend.size()?,
            bytes_after: fresh.size()?,
        };
        drop(fresh);

        std::fs::rename(&tmp, &path)?;
        state.backend = FileBackend::open(&path)?;
        state.frames = frames_after;

        info!(
            path = %path.display(),
            reclaimed = stats.reclaimed_bytes(),
            frames = stats.frames_after,
            "record log compacted"
        );
        Ok(stats)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl<B: StorageBackend> RecordStore for LogRecordStore<B> {
    fn load(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        Ok(self.state.lock().index.get(id).cloned())
    }

    fn save(&self, record: &Record) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.append(&Frame::Put(record), self.sync_on_write)?;
        state.index.insert(record.id, record.clone());
        Ok(())
    }

    fn remove(&self, id: &RecordId) -> StoreResult<()> {
        let mut state = self.state.lock();
        if !state.index.contains_key(id) {
            return Ok(());
        }
        state.append(&Frame::Remove(id), self.sync_on_write)?;
        state.index.remove(id);
        Ok(())
    }

    fn scan(&self) -> StoreResult<Vec<Record>> {
        Ok(self.state.lock().index.values().cloned().collect())
    }

    fn cursor(&self) -> StoreResult<Cursor> {
        Ok(self.state.lock().cursor.clone())
    }

    fn set_cursor(&self, cursor: &Cursor) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.cursor == *cursor {
            return Ok(());
        }
        state.append(&Frame::Cursor(cursor), self.sync_on_write)?;
        state.cursor = cursor.clone();
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.backend.flush()?;
        state.backend.sync()?;
        Ok(())
    }
}

impl<B: StorageBackend> fmt::Debug for LogRecordStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LogRecordStore")
            .field("records", &state.index.len())
            .field("frames", &state.frames)
            .field("cursor", &state.cursor)
            .field("lock", &self.lock.as_ref().map(|l| l.path.as_path()))
            .finish()
    }
}
