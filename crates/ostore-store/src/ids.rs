use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use ostore_kv::{Container, ContainerProvider};
use ostore_types::{decode_u32, encode_u32};

use crate::error::{StoreError, StoreResult};

/// Container holding the next free ID of every object type.
pub const DEFAULT_ID_CONTAINER: &str = "IdStore";

/// Per-type integer ID allocator.
///
/// Each record is the next ID to hand out (4-byte little-endian), keyed by
/// the type's full name. IDs start at 1. One mutex serializes every
/// read-modify-write.
pub struct ObjectIdStore {
    container: Arc<dyn Container>,
    lock: Mutex<()>,
}

impl ObjectIdStore {
    pub fn open(provider: &dyn ContainerProvider, container: &str) -> StoreResult<Self> {
        Ok(Self {
            container: provider.open(container)?,
            lock: Mutex::new(()),
        })
    }

    /// Allocate one ID.
    pub fn next(&self, object_type: &str) -> StoreResult<u32> {
        Ok(*self.reserve(object_type, 1)?.start())
    }

    /// Allocate `count` consecutive IDs.
    pub fn reserve(&self, object_type: &str, count: u32) -> StoreResult<RangeInclusive<u32>> {
        if count == 0 {
            return Err(StoreError::EmptyReservation(object_type.to_string()));
        }
        let _guard = self.guard();
        let first = self.load(object_type)?;
        let last = first
            .checked_add(count - 1)
            .ok_or_else(|| StoreError::IdsExhausted(object_type.to_string()))?;
        let next = last
            .checked_add(1)
            .ok_or_else(|| StoreError::IdsExhausted(object_type.to_string()))?;
        self.container.set(object_type.as_bytes(), &encode_u32(next))?;
        debug!(object_type, first, last, "IDs reserved");
        Ok(first..=last)
    }

    /// Give back the most recent reservation. Has no effect if IDs were
    /// allocated after it. Returns `true` if the IDs were reclaimed.
    pub fn release(&self, object_type: &str, range: RangeInclusive<u32>) -> StoreResult<bool> {
        let _guard = self.guard();
        let next = self.load(object_type)?;
        if range.is_empty() || range.end().checked_add(1) != Some(next) {
            return Ok(false);
        }
        self.container
            .set(object_type.as_bytes(), &encode_u32(*range.start()))?;
        debug!(object_type, first = *range.start(), "IDs released");
        Ok(true)
    }

    /// Highest ID handed out so far; 0 if none.
    pub fn current(&self, object_type: &str) -> StoreResult<u32> {
        let _guard = self.guard();
        Ok(self.load(object_type)? - 1)
    }

    /// Forget a type's counter. Returns `true` if it existed.
    pub fn remove(&self, object_type: &str) -> StoreResult<bool> {
        let _guard = self.guard();
        Ok(self.container.delete(object_type.as_bytes())?)
    }

    pub fn dispose(&self) -> StoreResult<()> {
        let _guard = self.guard();
        Ok(self.container.dispose()?)
    }

    /// Next free ID, at least 1.
    fn load(&self, object_type: &str) -> StoreResult<u32> {
        match self.container.get(object_type.as_bytes())? {
            Some(bytes) => Ok(decode_u32(&bytes)?.max(1)),
            None => Ok(1),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ObjectIdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIdStore")
            .field("container", &self.container.path())
            .finish()
    }
}
