use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use ostore_kv::{Container, ContainerProvider};
use ostore_types::{decode_u32, encode_u32, DependencyResolver, Notifier};

use crate::error::{VersionError, VersionResult};
use crate::event::VersionEvent;

/// Container holding one 4-byte version record per object type.
pub const DEFAULT_VERSION_CONTAINER: &str = "VersionStore";

/// Highest version handed out before wrapping back to 1.
pub const DEFAULT_ROLLOVER: u32 = 10_000_000;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the [`VersionStore`].
#[derive(Clone, Debug)]
pub struct VersionConfig {
    pub container: String,
    pub rollover: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_VERSION_CONTAINER.to_string(),
            rollover: DEFAULT_ROLLOVER,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// One pending change inside a locked update.
struct Staged {
    object_type: String,
    previous: u32,
    next: u32,
}

/// Persistent per-type version counters.
///
/// The lock covers both the container records and the in-memory cache of
/// versions already read. Dependents are resolved before the lock is taken
/// and all reads made while the write lock is held go through
/// [`load_locked`](Self::load_locked), so the store never re-enters its own
/// lock.
pub struct VersionStore {
    container: Arc<dyn Container>,
    versions: RwLock<HashMap<String, u32>>,
    dependencies: Arc<dyn DependencyResolver>,
    events: Notifier<VersionEvent>,
    config: VersionConfig,
}

impl VersionStore {
    pub fn open(
        provider: &dyn ContainerProvider,
        dependencies: Arc<dyn DependencyResolver>,
        config: VersionConfig,
    ) -> VersionResult<Self> {
        let container = provider.open(&config.container)?;
        debug!(container = %config.container, rollover = config.rollover, "version store opened");
        Ok(Self {
            container,
            versions: RwLock::new(HashMap::new()),
            dependencies,
            events: Notifier::new(),
            config,
        })
    }

    /// Change notifications, delivered after the lock is released.
    pub fn events(&self) -> &Notifier<VersionEvent> {
        &self.events
    }

    pub fn config(&self) -> &VersionConfig {
        &self.config
    }

    pub fn dispose(&self) -> VersionResult<()> {
        self.container.dispose()?;
        debug!(container = %self.config.container, "version store disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.container.is_disposed()
    }

    /// Current version of `object_type`; 0 if it has never been bumped.
    pub fn current(&self, object_type: &str) -> VersionResult<u32> {
        {
            let versions = self
                .versions
                .try_read_for(self.config.read_timeout)
                .ok_or_else(|| VersionError::ReadTimeout {
                    object_type: object_type.to_string(),
                    timeout: self.config.read_timeout,
                })?;
            if let Some(version) = versions.get(object_type) {
                return Ok(*version);
            }
        }

        // Cache miss: the record is read and memoized under the write lock.
        let mut versions = self.write_lock(object_type)?;
        self.load_locked(&mut versions, object_type)
    }

    /// Advance the version of `object_type` and of every type depending on
    /// it. Returns the new version of `object_type`.
    pub fn update(&self, object_type: &str) -> VersionResult<u32> {
        let dependents = self.dependencies.dependents_of(object_type);
        let mut targets = Vec::with_capacity(1 + dependents.len());
        targets.push(object_type.to_string());
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(object_type.to_string());
        targets.extend(dependents.into_iter().filter(|d| seen.insert(d.clone())));

        let staged = {
            let mut versions = self.write_lock(object_type)?;
            self.apply_locked(&mut versions, &targets)?
        };

        debug!(
            object_type,
            version = staged[0].next,
            dependents = staged.len() - 1,
            "version updated"
        );
        let version = staged[0].next;
        for change in staged {
            self.events.notify(VersionEvent::Changed {
                object_type: change.object_type,
                version: change.next,
            });
        }
        Ok(version)
    }

    /// Delete the version record of `object_type`, advancing the versions of
    /// its dependents.
    pub fn remove(&self, object_type: &str) -> VersionResult<()> {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(object_type.to_string());
        let dependents: Vec<String> = self
            .dependencies
            .dependents_of(object_type)
            .into_iter()
            .filter(|d| seen.insert(d.clone()))
            .collect();

        let staged = {
            let mut versions = self.write_lock(object_type)?;
            let staged = self.apply_locked(&mut versions, &dependents)?;
            self.container.delete(object_type.as_bytes())?;
            versions.remove(object_type);
            staged
        };

        debug!(object_type, dependents = staged.len(), "version removed");
        for change in staged {
            self.events.notify(VersionEvent::Changed {
                object_type: change.object_type,
                version: change.next,
            });
        }
        self.events.notify(VersionEvent::Removed {
            object_type: object_type.to_string(),
        });
        Ok(())
    }

    fn next_version(&self, version: u32) -> u32 {
        if version >= self.config.rollover {
            1
        } else {
            version + 1
        }
    }

    /// Read a version while the write lock is held.
    fn load_locked(
        &self,
        versions: &mut HashMap<String, u32>,
        object_type: &str,
    ) -> VersionResult<u32> {
        if let Some(version) = versions.get(object_type) {
            return Ok(*version);
        }
        let version = match self.container.get(object_type.as_bytes())? {
            Some(bytes) => decode_u32(&bytes).map_err(|source| VersionError::Corrupt {
                object_type: object_type.to_string(),
                source,
            })?,
            None => 0,
        };
        trace!(object_type, version, "version loaded");
        versions.insert(object_type.to_string(), version);
        Ok(version)
    }

    /// Persist the next version of every target, then publish them to the
    /// in-memory map. A failed write restores the records already written.
    fn apply_locked(
        &self,
        versions: &mut HashMap<String, u32>,
        targets: &[String],
    ) -> VersionResult<Vec<Staged>> {
        let mut staged = Vec::with_capacity(targets.len());
        for object_type in targets {
            let previous = self.load_locked(versions, object_type)?;
            staged.push(Staged {
                object_type: object_type.clone(),
                previous,
                next: self.next_version(previous),
            });
        }

        for (i, change) in staged.iter().enumerate() {
            if let Err(e) = self
                .container
                .set(change.object_type.as_bytes(), &encode_u32(change.next))
            {
                self.restore(&staged[..i]);
                return Err(e.into());
            }
        }

        for change in &staged {
            versions.insert(change.object_type.clone(), change.next);
        }
        Ok(staged)
    }

    fn restore(&self, written: &[Staged]) {
        for change in written {
            let result = if change.previous == 0 {
                self.container.delete(change.object_type.as_bytes()).map(|_| ())
            } else {
                self.container
                    .set(change.object_type.as_bytes(), &encode_u32(change.previous))
            };
            if let Err(e) = result {
                warn!(
                    object_type = %change.object_type,
                    error = %e,
                    "failed to restore version after aborted update"
                );
            }
        }
    }

    fn write_lock(
        &self,
        object_type: &str,
    ) -> VersionResult<parking_lot::RwLockWriteGuard<'_, HashMap<String, u32>>> {
        self.versions
            .try_write_for(self.config.write_timeout)
            .ok_or_else(|| VersionError::WriteTimeout {
                object_type: object_type.to_string(),
                timeout: self.config.write_timeout,
            })
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionStore")
            .field("container", &self.container.path())
            .field("config", &self.config)
            .finish()
    }
}
