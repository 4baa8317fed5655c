use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use ostore_meta::{MetadataEvent, MetadataStore};
use ostore_version::{VersionEvent, VersionStore};

use crate::error::{CacheError, CacheResult};
use crate::fingerprint::fingerprint;

/// One cached query result.
struct CacheEntry {
    ids: Vec<u32>,
    /// Cumulative reads. Never reset; eviction sorts ascending on it.
    access: AtomicU64,
}

/// All cached results for one object type, built against `version`.
struct CacheRecord {
    version: u32,
    dirty: AtomicBool,
    total_object_ids: usize,
    entries: HashMap<u32, CacheEntry>,
}

impl CacheRecord {
    fn new(version: u32) -> Self {
        Self {
            version,
            dirty: AtomicBool::new(false),
            total_object_ids: 0,
            entries: HashMap::new(),
        }
    }

    fn is_current(&self, version: u32) -> bool {
        !self.dirty.load(Ordering::Acquire) && self.version == version
    }
}

/// Identity of one cache entry, as produced by [`IndexerCache::enumerate`]
/// and accepted by [`IndexerCache::remove`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntryRef {
    pub object_type: String,
    pub fingerprint: u32,
    pub access_count: u64,
    pub object_ids: usize,
}

/// Aggregate cache size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheTotals {
    pub queries: usize,
    pub object_ids: usize,
}

/// Version-tagged query-result cache.
///
/// The type's version is read from the [`VersionStore`] before the cache
/// lock is taken, so the two locks are never held together.
pub struct IndexerCache {
    records: RwLock<HashMap<String, CacheRecord>>,
    versions: Arc<VersionStore>,
}

impl IndexerCache {
    /// Create a cache and subscribe it to version notifications.
    pub fn new(versions: Arc<VersionStore>) -> Arc<Self> {
        let cache = Arc::new(Self {
            records: RwLock::new(HashMap::new()),
            versions: Arc::clone(&versions),
        });
        let weak: Weak<Self> = Arc::downgrade(&cache);
        versions
            .events()
            .listen(Arc::new(move |event: &VersionEvent| {
                if let Some(cache) = weak.upgrade() {
                    cache.mark_dirty(event.object_type());
                }
            }));
        cache
    }

    /// Drop a type's record as soon as its metadata is removed.
    pub fn attach_metadata(self: &Arc<Self>, metadata: &MetadataStore) {
        let weak = Arc::downgrade(self);
        metadata
            .events()
            .listen(Arc::new(move |event: &MetadataEvent| {
                if let MetadataEvent::ObjectTypeRemoved(name) = event {
                    if let Some(cache) = weak.upgrade() {
                        cache.evict_type(&name.full_name());
                    }
                }
            }));
    }

    /// Cached IDs for a query, or `None` on a miss or stale record.
    ///
    /// `params[0]` is the object type's full name.
    pub fn get<S: AsRef<str>>(&self, params: &[S]) -> CacheResult<Option<Vec<u32>>> {
        let object_type = owning_type(params)?;
        let key = fingerprint(params);
        let version = self.versions.current(object_type)?;

        let records = self.records.read();
        let Some(record) = records.get(object_type) else {
            return Ok(None);
        };
        if !record.is_current(version) {
            // Left for the next set or cleaner pass.
            record.dirty.store(true, Ordering::Release);
            trace!(object_type, "stale cache record");
            return Ok(None);
        }
        Ok(record.entries.get(&key).map(|entry| {
            entry.access.fetch_add(1, Ordering::Relaxed);
            entry.ids.clone()
        }))
    }

    /// Current version of an object type, as the cache sees it.
    pub fn version(&self, object_type: &str) -> CacheResult<u32> {
        Ok(self.versions.current(object_type)?)
    }

    /// Cache `ids` as the result of a query, tagged with the type's current version.
    pub fn set<S: AsRef<str>>(&self, ids: &[u32], params: &[S]) -> CacheResult<()> {
        let version = self.versions.current(owning_type(params)?)?;
        self.set_at(ids, params, version).map(|_| ())
    }

    /// Cache `ids` as the result of a query computed against `version`.
    ///
    /// Returns `false` without caching when the type has moved past
    /// `version`, since `ids` may predate a committed write.
    pub fn set_at<S: AsRef<str>>(
        &self,
        ids: &[u32],
        params: &[S],
        version: u32,
    ) -> CacheResult<bool> {
        let object_type = owning_type(params)?;
        let key = fingerprint(params);
        if self.versions.current(object_type)? != version {
            trace!(object_type, version, "result outdated, not cached");
            return Ok(false);
        }

        // A bump landing after this check leaves the entry tagged with the
        // older version, so it misses on the next get.
        let mut records = self.records.write();
        let record = records
            .entry(object_type.to_string())
            .or_insert_with(|| CacheRecord::new(version));
        if !record.is_current(version) {
            debug!(object_type, version, "rebuilding stale cache record");
            *record = CacheRecord::new(version);
        }
        let entry = CacheEntry {
            ids: ids.to_vec(),
            access: AtomicU64::new(0),
        };
        if let Some(previous) = record.entries.insert(key, entry) {
            record.total_object_ids -= previous.ids.len();
        }
        record.total_object_ids += ids.len();
        Ok(true)
    }

    /// Remove enumerated entries. Returns how many were present.
    pub fn remove(&self, entries: &[CacheEntryRef]) -> usize {
        let mut records = self.records.write();
        let mut removed = 0;
        for entry in entries {
            let Some(record) = records.get_mut(&entry.object_type) else {
                continue;
            };
            if let Some(gone) = record.entries.remove(&entry.fingerprint) {
                record.total_object_ids -= gone.ids.len();
                removed += 1;
            }
            if record.entries.is_empty() {
                records.remove(&entry.object_type);
            }
        }
        removed
    }

    /// Drop every record.
    pub fn reset(&self) {
        let mut records = self.records.write();
        let count = records.len();
        records.clear();
        info!(records = count, "indexer cache reset");
    }

    /// Snapshot of every entry across every type.
    pub fn enumerate(&self) -> impl Iterator<Item = CacheEntryRef> {
        let records = self.records.read();
        let snapshot: Vec<CacheEntryRef> = records
            .iter()
            .flat_map(|(object_type, record)| {
                record
                    .entries
                    .iter()
                    .map(move |(fingerprint, entry)| CacheEntryRef {
                        object_type: object_type.clone(),
                        fingerprint: *fingerprint,
                        access_count: entry.access.load(Ordering::Relaxed),
                        object_ids: entry.ids.len(),
                    })
            })
            .collect();
        snapshot.into_iter()
    }

    pub fn totals(&self) -> CacheTotals {
        let records = self.records.read();
        records
            .values()
            .fold(CacheTotals::default(), |acc, record| CacheTotals {
                queries: acc.queries + record.entries.len(),
                object_ids: acc.object_ids + record.total_object_ids,
            })
    }

    /// Remove records that are dirty or tagged with an outdated version.
    /// Returns the number of records removed.
    pub fn purge_stale(&self) -> CacheResult<usize> {
        let tagged: Vec<(String, u32)> = self
            .records
            .read()
            .iter()
            .map(|(name, record)| (name.clone(), record.version))
            .collect();
        let mut current = HashMap::with_capacity(tagged.len());
        for (name, _) in &tagged {
            current.insert(name.clone(), self.versions.current(name)?);
        }

        let mut records = self.records.write();
        let before = records.len();
        records.retain(|name, record| match current.get(name) {
            Some(version) => record.is_current(*version),
            // Created after the snapshot; judged on the next pass.
            None => true,
        });
        let purged = before - records.len();
        if purged > 0 {
            debug!(purged, "stale cache records purged");
        }
        Ok(purged)
    }

    /// Number of per-type records.
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn contains_type(&self, object_type: &str) -> bool {
        self.records.read().contains_key(object_type)
    }

    fn mark_dirty(&self, object_type: &str) {
        if let Some(record) = self.records.read().get(object_type) {
            record.dirty.store(true, Ordering::Release);
            trace!(object_type, "cache record marked dirty");
        }
    }

    fn evict_type(&self, object_type: &str) {
        if self.records.write().remove(object_type).is_some() {
            debug!(object_type, "cache record evicted");
        }
    }
}

impl std::fmt::Debug for IndexerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerCache")
            .field("records", &self.record_count())
            .field("totals", &self.totals())
            .finish()
    }
}

fn owning_type<S: AsRef<str>>(params: &[S]) -> CacheResult<&str> {
    params
        .first()
        .map(AsRef::as_ref)
        .ok_or(CacheError::EmptyParameters)
}
