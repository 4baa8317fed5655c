use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::error::{KvError, KvResult};
use crate::path::validate_path;
use crate::traits::{Container, ContainerProvider};

/// Log record layout:
/// ```text
/// [1 byte:  op (1 = set, 2 = delete)]
/// [4 bytes: key length (little-endian u32)]
/// [4 bytes: value length (little-endian u32)]
/// [4 bytes: CRC32 of op, key and value (little-endian u32)]
/// [key bytes][value bytes]
/// ```
const HEADER_SIZE: usize = 13;
const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// File extension of container logs.
const EXTENSION: &str = "kv";

/// Flush/sync strategy for container logs.
#[derive(Clone, Debug, Default)]
pub enum SyncMode {
    /// `fsync` after every write.
    EveryWrite,
    /// Flush to the OS page cache only.
    #[default]
    OsDefault,
}

/// Configuration for file-backed containers.
#[derive(Clone, Debug)]
pub struct FileConfig {
    pub sync_mode: SyncMode,
    /// Rewrite the log once this many records have been superseded.
    pub compact_after: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            compact_after: 4096,
        }
    }
}

struct LogState {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    writer: BufWriter<File>,
    offset: u64,
    /// Records in the log that no longer describe a live entry.
    dead_records: usize,
}

/// Container persisted as an append-only, CRC-framed record log.
///
/// The whole live set is held in memory; the log is replayed on open.
/// Records that fail the CRC check are skipped, and a torn tail (from a
/// crash mid-append) is cut off.
pub struct FileContainer {
    path: String,
    file_path: PathBuf,
    state: Mutex<LogState>,
    config: FileConfig,
    disposed: AtomicBool,
}

impl FileContainer {
    /// Open (or create) the log at `file_path`.
    pub fn open(path: &str, file_path: &Path, config: FileConfig) -> KvResult<Self> {
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = match fs::read(file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let replayed = replay(path, &bytes);

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(file_path)?;
        if replayed.valid_len < bytes.len() as u64 {
            warn!(
                path,
                valid_len = replayed.valid_len,
                file_len = bytes.len(),
                "cutting torn tail from container log"
            );
            file.set_len(replayed.valid_len)?;
        }

        debug!(
            path,
            entries = replayed.entries.len(),
            dead = replayed.dead_records,
            "container log replayed"
        );

        Ok(Self {
            path: path.to_string(),
            file_path: file_path.to_path_buf(),
            state: Mutex::new(LogState {
                entries: replayed.entries,
                writer: BufWriter::new(file),
                offset: replayed.valid_len,
                dead_records: replayed.dead_records,
            }),
            config,
            disposed: AtomicBool::new(false),
        })
    }

    /// Path of the backing log file.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Current length of the log in bytes.
    pub fn log_len(&self) -> u64 {
        self.lock().offset
    }

    /// Rewrite the log so it holds exactly one record per live entry.
    pub fn compact(&self) -> KvResult<()> {
        let mut state = self.lock_open()?;
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut LogState) -> KvResult<()> {
        let tmp_path = self.file_path.with_extension("kv.compact");
        let mut offset = 0u64;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for (key, value) in &state.entries {
                let record = encode_record(OP_SET, key, value);
                tmp.write_all(&record)?;
                offset += record.len() as u64;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.file_path)?;

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.file_path)?;
        let reclaimed = state.dead_records;
        state.writer = BufWriter::new(file);
        state.offset = offset;
        state.dead_records = 0;

        info!(path = %self.path, reclaimed, len = offset, "container log compacted");
        Ok(())
    }

    fn append(&self, state: &mut LogState, record: &[u8]) -> KvResult<()> {
        state.writer.write_all(record)?;
        state.writer.flush()?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            state.writer.get_ref().sync_all()?;
        }
        state.offset += record.len() as u64;
        Ok(())
    }

    fn maybe_compact(&self, state: &mut LogState) -> KvResult<()> {
        if self.config.compact_after > 0 && state.dead_records >= self.config.compact_after {
            self.compact_locked(state)?;
        }
        Ok(())
    }

    fn check_open(&self) -> KvResult<()> {
        if self.is_disposed() {
            return Err(KvError::Disposed(self.path.clone()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the log for writing. `dispose` flips the flag under the same
    /// lock, so no append lands after a handle reports disposed.
    fn lock_open(&self) -> KvResult<MutexGuard<'_, LogState>> {
        let state = self.lock();
        self.check_open()?;
        Ok(state)
    }
}

impl Container for FileContainer {
    fn path(&self) -> &str {
        &self.path
    }

    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.check_open()?;
        let record = encode_record(OP_SET, key, value);
        let mut state = self.lock_open()?;
        self.append(&mut state, &record)?;
        if state.entries.insert(key.to_vec(), value.to_vec()).is_some() {
            state.dead_records += 1;
        }
        self.maybe_compact(&mut state)
    }

    fn delete(&self, key: &[u8]) -> KvResult<bool> {
        let mut state = self.lock_open()?;
        if !state.entries.contains_key(key) {
            return Ok(false);
        }
        let record = encode_record(OP_DELETE, key, &[]);
        self.append(&mut state, &record)?;
        state.entries.remove(key);
        // The delete record and the set it cancels are both dead.
        state.dead_records += 2;
        self.maybe_compact(&mut state)?;
        Ok(true)
    }

    fn enumerate(&self) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        Ok(self
            .lock()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn truncate(&self) -> KvResult<()> {
        let mut state = self.lock_open()?;
        state.writer.flush()?;
        state.writer.get_ref().set_len(0)?;
        state.entries.clear();
        state.offset = 0;
        state.dead_records = 0;
        debug!(path = %self.path, "container truncated");
        Ok(())
    }

    fn dispose(&self) -> KvResult<()> {
        let mut state = self.lock();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        state.writer.flush()?;
        debug!(path = %self.path, "file container disposed");
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn count(&self) -> KvResult<usize> {
        self.check_open()?;
        Ok(self.lock().entries.len())
    }
}

impl std::fmt::Debug for FileContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileContainer")
            .field("path", &self.path)
            .field("file_path", &self.file_path)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn encode_record(op: u8, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[op]);
    hasher.update(key);
    hasher.update(value);
    let crc = hasher.finalize();

    let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len());
    buf.push(op);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

struct Replayed {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    valid_len: u64,
    dead_records: usize,
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Replay a log front-to-back into the live entry map.
fn replay(path: &str, bytes: &[u8]) -> Replayed {
    let mut entries = BTreeMap::new();
    let mut dead_records = 0usize;
    let mut offset = 0usize;

    while offset + HEADER_SIZE <= bytes.len() {
        let op = bytes[offset];
        let key_len = read_u32(bytes, offset + 1) as usize;
        let value_len = read_u32(bytes, offset + 5) as usize;
        let expected_crc = read_u32(bytes, offset + 9);

        let body_start = offset + HEADER_SIZE;
        let Some(body_end) = body_start
            .checked_add(key_len)
            .and_then(|n| n.checked_add(value_len))
            .filter(|end| *end <= bytes.len())
        else {
            warn!(path, offset, "truncated container record; stopping replay");
            break;
        };

        let key = &bytes[body_start..body_start + key_len];
        let value = &bytes[body_start + key_len..body_end];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[op]);
        hasher.update(key);
        hasher.update(value);
        let actual_crc = hasher.finalize();

        if actual_crc != expected_crc {
            warn!(
                path,
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping container record"
            );
            dead_records += 1;
        } else {
            match op {
                OP_SET => {
                    if entries.insert(key.to_vec(), value.to_vec()).is_some() {
                        dead_records += 1;
                    }
                }
                OP_DELETE => {
                    if entries.remove(key).is_some() {
                        dead_records += 2;
                    } else {
                        dead_records += 1;
                    }
                }
                other => {
                    warn!(path, offset, op = other, "unknown record op; skipping");
                    dead_records += 1;
                }
            }
        }

        offset = body_end;
    }

    Replayed {
        entries,
        valid_len: offset as u64,
        dead_records,
    }
}

/// Provider of [`FileContainer`]s rooted at a directory.
///
/// Container path `Store/Shop.Order` maps to `<root>/Store/Shop.Order.kv`.
/// At most one live handle exists per path; opening an already-open path
/// returns the same handle.
pub struct FileContainerProvider {
    root: PathBuf,
    config: FileConfig,
    open: Mutex<HashMap<String, Weak<FileContainer>>>,
}

impl FileContainerProvider {
    /// Create a provider rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>, config: FileConfig) -> KvResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "file container provider ready");
        Ok(Self {
            root,
            config,
            open: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> PathBuf {
        let mut file_path = self.root.clone();
        for segment in path.split('/') {
            file_path.push(segment);
        }
        let file_name = file_path
            .file_name()
            .map(|n| format!("{}.{EXTENSION}", n.to_string_lossy()))
            .unwrap_or_default();
        file_path.set_file_name(file_name);
        file_path
    }

    fn open_handles(&self) -> MutexGuard<'_, HashMap<String, Weak<FileContainer>>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContainerProvider for FileContainerProvider {
    fn open(&self, path: &str) -> KvResult<Arc<dyn Container>> {
        validate_path(path)?;
        let mut handles = self.open_handles();
        if let Some(existing) = handles.get(path).and_then(Weak::upgrade) {
            if !existing.is_disposed() {
                return Ok(existing);
            }
        }
        let container = Arc::new(FileContainer::open(
            path,
            &self.file_path(path),
            self.config.clone(),
        )?);
        handles.insert(path.to_string(), Arc::downgrade(&container));
        Ok(container)
    }

    fn exists(&self, path: &str) -> KvResult<bool> {
        validate_path(path)?;
        Ok(self.file_path(path).exists())
    }

    fn destroy(&self, path: &str) -> KvResult<bool> {
        validate_path(path)?;
        if let Some(handle) = self.open_handles().remove(path).and_then(|w| w.upgrade()) {
            handle.dispose()?;
        }
        let file_path = self.file_path(path);
        match fs::remove_file(&file_path) {
            Ok(()) => {
                info!(path, "file container destroyed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for FileContainerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileContainerProvider")
            .field("root", &self.root)
            .finish()
    }
}
