use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::error::{KvError, KvResult};
use crate::path::validate_path;
use crate::traits::{Container, ContainerProvider};

/// Data shared by every handle opened on the same path.
#[derive(Default)]
struct SharedData {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    destroyed: AtomicBool,
}

/// In-memory, `BTreeMap`-based container.
///
/// Handles opened on the same path by one provider share their data, so a
/// disposed and re-opened container sees everything written before.
pub struct MemoryContainer {
    path: String,
    shared: Arc<SharedData>,
    disposed: AtomicBool,
}

impl MemoryContainer {
    fn check_open(&self) -> KvResult<()> {
        if self.is_disposed() {
            return Err(KvError::Disposed(self.path.clone()));
        }
        Ok(())
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        self.shared
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        self.shared
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Container for MemoryContainer {
    fn path(&self) -> &str {
        &self.path
    }

    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.read_map().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.check_open()?;
        self.write_map().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> KvResult<bool> {
        self.check_open()?;
        Ok(self.write_map().remove(key).is_some())
    }

    fn enumerate(&self) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;
        Ok(self
            .read_map()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn truncate(&self) -> KvResult<()> {
        self.check_open()?;
        self.write_map().clear();
        Ok(())
    }

    fn dispose(&self) -> KvResult<()> {
        self.disposed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire) || self.shared.destroyed.load(Ordering::Acquire)
    }

    fn count(&self) -> KvResult<usize> {
        self.check_open()?;
        Ok(self.read_map().len())
    }
}

impl std::fmt::Debug for MemoryContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContainer")
            .field("path", &self.path)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Provider of in-memory containers. Data lives as long as the provider.
#[derive(Default)]
pub struct MemoryContainerProvider {
    containers: RwLock<HashMap<String, Arc<SharedData>>>,
}

impl MemoryContainerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted paths of every existing container.
    pub fn paths(&self) -> Vec<String> {
        let map = self
            .containers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = map.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl ContainerProvider for MemoryContainerProvider {
    fn open(&self, path: &str) -> KvResult<Arc<dyn Container>> {
        validate_path(path)?;
        let shared = {
            let mut map = self
                .containers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(path.to_string()).or_default())
        };
        debug!(path, "memory container opened");
        Ok(Arc::new(MemoryContainer {
            path: path.to_string(),
            shared,
            disposed: AtomicBool::new(false),
        }))
    }

    fn exists(&self, path: &str) -> KvResult<bool> {
        validate_path(path)?;
        Ok(self
            .containers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path))
    }

    fn destroy(&self, path: &str) -> KvResult<bool> {
        validate_path(path)?;
        let removed = self
            .containers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        match removed {
            Some(shared) => {
                shared.destroyed.store(true, Ordering::Release);
                debug!(path, "memory container destroyed");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for MemoryContainerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContainerProvider")
            .field("container_count", &self.paths().len())
            .finish()
    }
}
