use std::sync::Arc;

use crate::error::KvResult;

/// A named key-value container.
///
/// All implementations must satisfy these invariants:
/// - Keys and values are opaque byte strings.
/// - `set` replaces any existing value for the key.
/// - `enumerate` returns a snapshot ordered by key.
/// - After `dispose`, every operation fails with `KvError::Disposed`.
pub trait Container: Send + Sync {
    /// The path this container was opened at.
    fn path(&self) -> &str;

    /// Read a value. Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Write a value, replacing any existing one.
    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Delete a key. Returns `true` if it existed.
    fn delete(&self, key: &[u8]) -> KvResult<bool>;

    /// Snapshot of every entry, ordered by key.
    fn enumerate(&self) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Remove every entry.
    fn truncate(&self) -> KvResult<()>;

    /// Release the handle. Idempotent.
    fn dispose(&self) -> KvResult<()>;

    fn is_disposed(&self) -> bool;

    /// Number of entries.
    ///
    /// Default implementation enumerates. Backends may override.
    fn count(&self) -> KvResult<usize> {
        Ok(self.enumerate()?.len())
    }
}

/// Opens containers by path.
pub trait ContainerProvider: Send + Sync {
    /// Open (creating if absent) the container at `path`.
    fn open(&self, path: &str) -> KvResult<Arc<dyn Container>>;

    /// Whether a container exists at `path`.
    fn exists(&self, path: &str) -> KvResult<bool>;

    /// Remove the container at `path` and all its data. Returns `true` if it
    /// existed. Open handles become disposed.
    fn destroy(&self, path: &str) -> KvResult<bool>;
}
