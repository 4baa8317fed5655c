use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use ostore_kv::{container_path, Container, ContainerProvider, KvError, KvResult};
use ostore_types::{decode_u32, encode_u32, ObjectTypeName, StoredEntry};

use crate::codec::{pack, unpack};
use crate::error::{StoreError, StoreResult};

/// Root of the primary (ID-keyed) containers.
pub const STORE_ROOT: &str = "Store";

/// Root of the secondary-key containers.
pub const SECONDARY_STORE_ROOT: &str = "SecondaryStore";

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Configuration for the [`ObjectStore`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub store_root: String,
    pub secondary_root: String,
    /// Close containers idle for longer than `idle_timeout`.
    pub auto_close: bool,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_root: STORE_ROOT.to_string(),
            secondary_root: SECONDARY_STORE_ROOT.to_string(),
            auto_close: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Container collections
// ---------------------------------------------------------------------------

struct OpenContainer {
    container: Arc<dyn Container>,
    expires: Instant,
}

/// Lazily opened containers under one root, keyed by type full name.
struct Collection {
    root: String,
    open: Mutex<HashMap<String, OpenContainer>>,
}

impl Collection {
    fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            open: Mutex::new(HashMap::new()),
        }
    }

    fn path(&self, object_type: &str) -> String {
        container_path(&self.root, object_type)
    }

    /// Return the open container for `object_type`, opening it if needed,
    /// and push its expiry out by `ttl`.
    fn resolve(
        &self,
        provider: &dyn ContainerProvider,
        object_type: &str,
        ttl: Duration,
    ) -> KvResult<Arc<dyn Container>> {
        let mut open = self.lock();
        let expires = Instant::now() + ttl;
        if let Some(entry) = open.get_mut(object_type) {
            if !entry.container.is_disposed() {
                entry.expires = expires;
                return Ok(Arc::clone(&entry.container));
            }
        }
        let container = provider.open(&self.path(object_type))?;
        debug!(path = %container.path(), "container opened");
        open.insert(
            object_type.to_string(),
            OpenContainer {
                container: Arc::clone(&container),
                expires,
            },
        );
        Ok(container)
    }

    fn close(&self, object_type: &str) {
        if let Some(entry) = self.lock().remove(object_type) {
            dispose_logged(&entry.container);
        }
    }

    /// Close every container whose expiry has passed.
    fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<OpenContainer> = {
            let mut open = self.lock();
            let names: Vec<String> = open
                .iter()
                .filter(|(_, entry)| entry.expires <= now)
                .map(|(name, _)| name.clone())
                .collect();
            names.iter().filter_map(|name| open.remove(name)).collect()
        };
        for entry in &expired {
            dispose_logged(&entry.container);
        }
        expired.len()
    }

    fn dispose_all(&self) -> usize {
        let all: Vec<OpenContainer> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in &all {
            dispose_logged(&entry.container);
        }
        all.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OpenContainer>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn dispose_logged(container: &Arc<dyn Container>) {
    match container.dispose() {
        Ok(()) => debug!(path = %container.path(), "container closed"),
        Err(e) => warn!(path = %container.path(), error = %e, "failed to close container"),
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

struct StoreInner {
    provider: Arc<dyn ContainerProvider>,
    primary: Collection,
    secondary: Collection,
    /// Whether a type's secondary container exists. Probed once, then
    /// kept current by this store.
    secondary_present: Mutex<HashMap<String, bool>>,
    config: StoreConfig,
}

struct Sweeper {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Per-type payload containers with secondary-key lookup.
pub struct ObjectStore {
    inner: Arc<StoreInner>,
    sweeper: Mutex<Option<Sweeper>>,
    disposed: AtomicBool,
}

impl ObjectStore {
    /// Create a store. Starts the idle sweep when auto-close is enabled with
    /// a positive timeout.
    pub fn new(provider: Arc<dyn ContainerProvider>, config: StoreConfig) -> StoreResult<Self> {
        let inner = Arc::new(StoreInner {
            provider,
            primary: Collection::new(&config.store_root),
            secondary: Collection::new(&config.secondary_root),
            secondary_present: Mutex::new(HashMap::new()),
            config,
        });

        let sweeper = if inner.config.auto_close && !inner.config.idle_timeout.is_zero() {
            Some(start_sweeper(Arc::downgrade(&inner))?)
        } else {
            None
        };
        info!(
            auto_close = inner.config.auto_close,
            idle_timeout_ms = inner.config.idle_timeout.as_millis() as u64,
            "object store ready"
        );
        Ok(Self {
            inner,
            sweeper: Mutex::new(sweeper),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Write an entry. A changed secondary key replaces the old mapping.
    pub fn set(&self, object_type: &ObjectTypeName, entry: &StoredEntry) -> StoreResult<()> {
        self.check_open()?;
        let full = object_type.full_name();
        let key = encode_u32(entry.id);
        let new_secondary = entry.unique_key.as_deref().filter(|k| !k.is_empty());

        let previous = self.with_primary(&full, |c| c.get(&key))?;
        self.with_primary(&full, |c| c.set(&key, &pack(new_secondary, &entry.value)))?;

        let old_secondary = previous
            .as_deref()
            .and_then(|raw| unpack(raw).secondary_key.map(<[u8]>::to_vec));
        if let Some(old) = old_secondary {
            if Some(old.as_slice()) != new_secondary {
                self.with_secondary(&full, |c| unmap_secondary(c, &old, &key))?;
            }
        }
        if let Some(secondary) = new_secondary {
            self.with_secondary(&full, |c| c.set(secondary, &key))?;
        }
        debug!(object_type = %full, id = entry.id, "object stored");
        Ok(())
    }

    /// Remove an entry and its secondary mapping. Returns `true` if it existed.
    pub fn remove(&self, object_type: &ObjectTypeName, id: u32) -> StoreResult<bool> {
        self.check_open()?;
        let full = object_type.full_name();
        let key = encode_u32(id);
        let Some(raw) = self.with_primary(&full, |c| c.get(&key))? else {
            return Ok(false);
        };
        if let Some(secondary) = unpack(&raw).secondary_key {
            if self.has_secondary(&full)? {
                self.with_secondary(&full, |c| unmap_secondary(c, secondary, &key))?;
            }
        }
        self.with_primary(&full, |c| c.delete(&key))?;
        debug!(object_type = %full, id, "object removed");
        Ok(true)
    }

    /// Remove every entry of a type, keeping its containers.
    pub fn truncate(&self, object_type: &ObjectTypeName) -> StoreResult<()> {
        self.check_open()?;
        let full = object_type.full_name();
        self.with_primary(&full, |c| c.truncate())?;
        if self.has_secondary(&full)? {
            self.with_secondary(&full, |c| c.truncate())?;
        }
        info!(object_type = %full, "object store truncated");
        Ok(())
    }

    /// Close and delete both containers of a type.
    pub fn destroy(&self, object_type: &ObjectTypeName) -> StoreResult<()> {
        self.check_open()?;
        let full = object_type.full_name();
        let inner = &self.inner;
        inner.primary.close(&full);
        inner.secondary.close(&full);
        inner.provider.destroy(&inner.primary.path(&full))?;
        inner.provider.destroy(&inner.secondary.path(&full))?;
        self.presence().insert(full.clone(), false);
        info!(object_type = %full, "object containers destroyed");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Payload of an entry, without any embedded secondary key.
    pub fn get(&self, object_type: &ObjectTypeName, id: u32) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.get_entry(object_type, id)?.map(|entry| entry.value))
    }

    /// Entry with its secondary key split out.
    pub fn get_entry(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
    ) -> StoreResult<Option<StoredEntry>> {
        self.check_open()?;
        let full = object_type.full_name();
        let raw = self.with_primary(&full, |c| c.get(&encode_u32(id)))?;
        Ok(raw.map(|raw| to_entry(id, &raw)))
    }

    /// Primary ID mapped to a secondary key.
    pub fn resolve_secondary_key(
        &self,
        object_type: &ObjectTypeName,
        secondary_key: &[u8],
    ) -> StoreResult<Option<u32>> {
        self.check_open()?;
        let full = object_type.full_name();
        if !self.has_secondary(&full)? {
            return Ok(None);
        }
        match self.with_secondary(&full, |c| c.get(secondary_key))? {
            Some(bytes) => Ok(Some(decode_u32(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_secondary_key(
        &self,
        object_type: &ObjectTypeName,
        secondary_key: &[u8],
    ) -> StoreResult<Option<Vec<u8>>> {
        match self.resolve_secondary_key(object_type, secondary_key)? {
            Some(id) => self.get(object_type, id),
            None => Ok(None),
        }
    }

    pub fn count(&self, object_type: &ObjectTypeName) -> StoreResult<usize> {
        self.check_open()?;
        Ok(self.with_primary(&object_type.full_name(), |c| c.count())?)
    }

    /// Every entry of a type, ordered by ID. Records with a malformed key
    /// are logged and skipped.
    pub fn iterate(&self, object_type: &ObjectTypeName) -> StoreResult<Vec<StoredEntry>> {
        self.check_open()?;
        let full = object_type.full_name();
        let raw = self.with_primary(&full, |c| c.enumerate())?;
        let mut entries: Vec<StoredEntry> = raw
            .into_iter()
            .filter_map(|(key, value)| match decode_u32(&key) {
                Ok(id) => Some(to_entry(id, &value)),
                Err(e) => {
                    warn!(object_type = %full, error = %e, "skipping record with malformed key");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.id);
        Ok(entries)
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Number of open primary and secondary containers.
    pub fn open_containers(&self) -> usize {
        self.inner.primary.len() + self.inner.secondary.len()
    }

    /// Close containers whose idle timeout has passed.
    pub fn close_idle(&self) -> usize {
        self.inner.sweep(Instant::now())
    }

    /// Close a type's containers; they reopen on next use.
    pub fn close(&self, object_type: &ObjectTypeName) {
        let full = object_type.full_name();
        self.inner.primary.close(&full);
        self.inner.secondary.close(&full);
    }

    /// Stop the sweep and close every container. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown.store(true, Ordering::Relaxed);
            if sweeper.handle.join().is_err() {
                warn!("object store sweep thread panicked");
            }
        }
        let closed = self.inner.primary.dispose_all() + self.inner.secondary.dispose_all();
        info!(closed, "object store disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn check_open(&self) -> StoreResult<()> {
        if self.is_disposed() {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    fn with_primary<T>(
        &self,
        object_type: &str,
        op: impl Fn(&dyn Container) -> KvResult<T>,
    ) -> StoreResult<T> {
        with_container(&self.inner, &self.inner.primary, object_type, op)
    }

    fn with_secondary<T>(
        &self,
        object_type: &str,
        op: impl Fn(&dyn Container) -> KvResult<T>,
    ) -> StoreResult<T> {
        let result = with_container(&self.inner, &self.inner.secondary, object_type, op)?;
        self.presence().insert(object_type.to_string(), true);
        Ok(result)
    }

    fn has_secondary(&self, object_type: &str) -> StoreResult<bool> {
        if let Some(present) = self.presence().get(object_type) {
            return Ok(*present);
        }
        let present = self
            .inner
            .provider
            .exists(&self.inner.secondary.path(object_type))?;
        self.presence().insert(object_type.to_string(), present);
        Ok(present)
    }

    fn presence(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.inner
            .secondary_present
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("open_containers", &self.open_containers())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl StoreInner {
    fn ttl(&self) -> Duration {
        if self.config.auto_close {
            self.config.idle_timeout
        } else {
            // Never expires.
            Duration::from_secs(u32::MAX as u64)
        }
    }

    fn sweep(&self, now: Instant) -> usize {
        let closed = self.primary.sweep(now) + self.secondary.sweep(now);
        if closed > 0 {
            debug!(closed, "idle containers closed");
        }
        closed
    }
}

/// Run `op` on a resolved container. A handle closed by the sweep between
/// resolution and use is reopened once.
fn with_container<T>(
    inner: &StoreInner,
    collection: &Collection,
    object_type: &str,
    op: impl Fn(&dyn Container) -> KvResult<T>,
) -> StoreResult<T> {
    let ttl = inner.ttl();
    let container = collection.resolve(inner.provider.as_ref(), object_type, ttl)?;
    match op(container.as_ref()) {
        Err(KvError::Disposed(_)) => {
            let container = collection.resolve(inner.provider.as_ref(), object_type, ttl)?;
            Ok(op(container.as_ref())?)
        }
        other => Ok(other?),
    }
}

/// Delete a secondary mapping only while it still points at `id_key`; a
/// later writer may have claimed the key for another ID.
fn unmap_secondary(
    container: &dyn Container,
    secondary_key: &[u8],
    id_key: &[u8],
) -> KvResult<()> {
    if container.get(secondary_key)?.as_deref() == Some(id_key) {
        container.delete(secondary_key)?;
    }
    Ok(())
}

fn to_entry(id: u32, raw: &[u8]) -> StoredEntry {
    let unpacked = unpack(raw);
    StoredEntry {
        id,
        unique_key: unpacked.secondary_key.map(<[u8]>::to_vec),
        value: unpacked.value.to_vec(),
    }
}

fn start_sweeper(inner: Weak<StoreInner>) -> StoreResult<Sweeper> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let interval = inner
        .upgrade()
        .map(|i| i.config.sweep_interval)
        .unwrap_or(DEFAULT_SWEEP_INTERVAL)
        .max(Duration::from_millis(1));

    let handle = thread::Builder::new()
        .name("ostore-store-sweep".into())
        .spawn(move || {
            let slice = SLEEP_SLICE.min(interval);
            while !flag.load(Ordering::Relaxed) {
                let mut elapsed = Duration::ZERO;
                while elapsed < interval {
                    if flag.load(Ordering::Relaxed) {
                        return;
                    }
                    thread::sleep(slice);
                    elapsed += slice;
                }
                match inner.upgrade() {
                    Some(inner) => {
                        inner.sweep(Instant::now());
                    }
                    None => return,
                }
            }
        })
        .map_err(StoreError::Spawn)?;
    Ok(Sweeper { shutdown, handle })
}
