use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use ostore_cache::{CacheTotals, HardPruneCacheCleaner, IndexerCache};
use ostore_index::{ContainerIndexProvider, ObjectIndexer, Query, RawConstraint};
use ostore_kv::{ContainerProvider, FileConfig, FileContainerProvider, MemoryContainerProvider};
use ostore_meta::MetadataStore;
use ostore_store::{ObjectIdStore, ObjectStore};
use ostore_types::{
    new_unique_key, ObjectRecord, ObjectTypeName, ObjectTypeSchema, StoredEntry,
};
use ostore_version::VersionStore;

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::transaction::TransactionScope;

/// Identities handed out by one `store` call, kept so a failed call can
/// give them back.
#[derive(Default)]
struct Assigned {
    ids: Option<RangeInclusive<u32>>,
    id_slots: Vec<usize>,
    key_slots: Vec<usize>,
}

/// Embedded object store.
///
/// Composes the metadata store, version store, ID store, payload store,
/// indexer and (optionally) the query cache with its cleaner. Every
/// operation validates against metadata before it changes anything.
pub struct ObjectService {
    metadata: Arc<MetadataStore>,
    versions: Arc<VersionStore>,
    ids: ObjectIdStore,
    store: ObjectStore,
    indexer: ObjectIndexer,
    cache: Option<Arc<IndexerCache>>,
    cleaner: Mutex<Option<HardPruneCacheCleaner>>,
    config: ServiceConfig,
    disposed: AtomicBool,
}

impl ObjectService {
    /// Open a service over any container provider.
    pub fn open(kv: Arc<dyn ContainerProvider>, config: ServiceConfig) -> ServiceResult<Self> {
        config.validate()?;

        let metadata = Arc::new(MetadataStore::open(kv.as_ref(), config.meta_config())?);
        let versions = Arc::new(VersionStore::open(
            kv.as_ref(),
            metadata.clone(),
            config.version_config(),
        )?);
        let ids = ObjectIdStore::open(kv.as_ref(), &config.store.id_container)?;
        let store = ObjectStore::new(Arc::clone(&kv), config.store_config())?;

        let (cache, cleaner) = if config.cache.enabled {
            let cache = IndexerCache::new(Arc::clone(&versions));
            cache.attach_metadata(&metadata);
            let cleaner = HardPruneCacheCleaner::start(Arc::clone(&cache), config.cleaner_config())?;
            (Some(cache), Some(cleaner))
        } else {
            (None, None)
        };

        let provider = Arc::new(ContainerIndexProvider::with_root(kv, config.index.root.clone()));
        let indexer = ObjectIndexer::new(provider, Arc::clone(&metadata), cache.clone());

        info!(cache = config.cache.enabled, "object service opened");
        Ok(Self {
            metadata,
            versions,
            ids,
            store,
            indexer,
            cache,
            cleaner: Mutex::new(cleaner),
            config,
            disposed: AtomicBool::new(false),
        })
    }

    /// Open a service persisted under `dir`.
    pub fn open_dir(dir: impl AsRef<Path>, config: ServiceConfig) -> ServiceResult<Self> {
        let kv = FileContainerProvider::new(dir.as_ref(), FileConfig::default())?;
        Self::open(Arc::new(kv), config)
    }

    /// Open a service that keeps everything in memory.
    pub fn in_memory(config: ServiceConfig) -> ServiceResult<Self> {
        Self::open(Arc::new(MemoryContainerProvider::new()), config)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    // ---- Namespaces ----

    pub fn create_namespace(&self, namespace: &str) -> ServiceResult<()> {
        self.check_open()?;
        self.metadata.create_namespace(namespace)?;
        Ok(())
    }

    /// Remove a namespace with all its object types and their data.
    pub fn remove_namespace(&self, namespace: &str) -> ServiceResult<()> {
        self.check_open()?;
        for schema in self.metadata.object_types(namespace)? {
            let name = ObjectTypeName::new(namespace, schema.name.as_str())?;
            self.drop_storage(&name)?;
        }
        // Versions last, once no type of the namespace can be bumped as a dependent.
        for name in self.metadata.remove_namespace(namespace)? {
            self.versions.remove(&name.full_name())?;
        }
        Ok(())
    }

    pub fn namespaces(&self) -> ServiceResult<Vec<String>> {
        self.check_open()?;
        Ok(self.metadata.namespaces())
    }

    // ---- Object types ----

    /// Register an object type and create its index storage.
    ///
    /// Fails without side effects if the type already exists.
    pub fn provision(
        &self,
        namespace: &str,
        schema: ObjectTypeSchema,
    ) -> ServiceResult<ObjectTypeName> {
        self.check_open()?;
        let name = self.metadata.validate_object_type(namespace, &schema)?;
        if self.indexer.is_provisioned(&name)? {
            return Err(ServiceError::Validation(format!(
                "index storage for {name} already exists"
            )));
        }

        let mut scope = TransactionScope::new("provision");
        self.metadata.add_object_type(namespace, schema.clone())?;
        scope.on_rollback("metadata", || {
            self.metadata.remove_object_type(&name).map(|_| ())
        });
        self.indexer.provision(&name, &schema)?;
        scope.commit();

        info!(object_type = %name, indexes = schema.indexes.len(), "object type provisioned");
        Ok(name)
    }

    /// Remove an object type, its data, indexes, ID counter and version.
    /// Types depending on it get a version bump.
    pub fn unprovision(&self, name: &ObjectTypeName) -> ServiceResult<()> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        self.drop_data(name)?;
        self.metadata.remove_object_type(name)?;
        info!(object_type = %name, "object type unprovisioned");
        Ok(())
    }

    pub fn schema(&self, name: &ObjectTypeName) -> ServiceResult<ObjectTypeSchema> {
        self.check_open()?;
        Ok(self.metadata.require_object_type(name)?)
    }

    pub fn object_types(&self, namespace: &str) -> ServiceResult<Vec<ObjectTypeSchema>> {
        self.check_open()?;
        Ok(self.metadata.object_types(namespace)?)
    }

    // ---- Writes ----

    /// Store objects, assigning IDs (and unique keys where the schema
    /// requires them) to records that lack one. Returns the IDs in input
    /// order.
    ///
    /// A record that carries an ID updates that object; the ID must have
    /// been allocated before. On failure every write of the call is undone
    /// and assigned identities are taken back off the records.
    pub fn store(
        &self,
        name: &ObjectTypeName,
        objects: &mut [ObjectRecord],
    ) -> ServiceResult<Vec<u32>> {
        self.check_open()?;
        let schema = self.metadata.require_object_type(name)?;
        self.validate_records(name, objects)?;

        let assigned = self.assign_identities(name, &schema, objects)?;
        match self.write_records(name, objects) {
            Ok(ids) => {
                debug!(object_type = %name, count = ids.len(), "objects stored");
                Ok(ids)
            }
            Err(e) => {
                self.release_identities(name, objects, assigned);
                Err(e)
            }
        }
    }

    /// Remove one object. Returns `true` if it existed.
    pub fn remove(&self, name: &ObjectTypeName, id: u32) -> ServiceResult<bool> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        let Some(previous) = self.store.get_entry(name, id)? else {
            return Ok(false);
        };
        let previous_index = self.indexer.index_values(name, id)?;

        let mut scope = TransactionScope::new("remove");
        self.store.remove(name, id)?;
        scope.on_rollback("payload", || self.store.set(name, &previous));
        self.indexer.remove(name, id)?;
        if let Some(values) = previous_index {
            scope.on_rollback("index", move || self.indexer.upsert(name, id, &values));
        }
        self.versions.update(&name.full_name())?;
        scope.commit();

        debug!(object_type = %name, id, "object removed");
        Ok(true)
    }

    pub fn remove_by_key(&self, name: &ObjectTypeName, key: &[u8]) -> ServiceResult<bool> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        match self.store.resolve_secondary_key(name, key)? {
            Some(id) => self.remove(name, id),
            None => Ok(false),
        }
    }

    /// Remove every object of a type, keeping the type provisioned.
    pub fn truncate(&self, name: &ObjectTypeName) -> ServiceResult<()> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        self.store.truncate(name)?;
        self.indexer.truncate(name)?;
        self.versions.update(&name.full_name())?;
        info!(object_type = %name, "object type truncated");
        Ok(())
    }

    // ---- Reads ----

    pub fn get(&self, name: &ObjectTypeName, id: u32) -> ServiceResult<Option<ObjectRecord>> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        match self.store.get_entry(name, id)? {
            Some(entry) => Ok(Some(self.to_record(name, entry)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_key(
        &self,
        name: &ObjectTypeName,
        key: &[u8],
    ) -> ServiceResult<Option<ObjectRecord>> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        match self.store.resolve_secondary_key(name, key)? {
            Some(id) => self.get(name, id),
            None => Ok(None),
        }
    }

    /// Objects for `ids`, in order, skipping IDs with no object.
    pub fn get_many(&self, name: &ObjectTypeName, ids: &[u32]) -> ServiceResult<Vec<ObjectRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(name, *id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// IDs of the objects matching `query`, ascending.
    pub fn find_ids(&self, name: &ObjectTypeName, query: &Query) -> ServiceResult<Vec<u32>> {
        self.check_open()?;
        Ok(self.indexer.find(name, query)?)
    }

    pub fn find(&self, name: &ObjectTypeName, query: &Query) -> ServiceResult<Vec<ObjectRecord>> {
        let ids = self.find_ids(name, query)?;
        self.get_many(name, &ids)
    }

    /// Build a typed query from `index<op>literal` terms.
    pub fn typed_query(
        &self,
        name: &ObjectTypeName,
        terms: &[RawConstraint],
        top: Option<usize>,
    ) -> ServiceResult<Query> {
        self.check_open()?;
        Ok(self.indexer.typed_query(name, terms, top)?)
    }

    pub fn count(&self, name: &ObjectTypeName) -> ServiceResult<usize> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        Ok(self.store.count(name)?)
    }

    /// Every object of a type, ordered by ID.
    pub fn iterate(&self, name: &ObjectTypeName) -> ServiceResult<Vec<ObjectRecord>> {
        self.check_open()?;
        self.metadata.require_object_type(name)?;
        self.store
            .iterate(name)?
            .into_iter()
            .map(|entry| self.to_record(name, entry))
            .collect()
    }

    /// Current version of a type.
    pub fn version(&self, name: &ObjectTypeName) -> ServiceResult<u32> {
        self.check_open()?;
        Ok(self.versions.current(&name.full_name())?)
    }

    // ---- Cache ----

    /// Cache size, or `None` when caching is disabled.
    pub fn cache_totals(&self) -> Option<CacheTotals> {
        self.cache.as_ref().map(|cache| cache.totals())
    }

    pub fn reset_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.reset();
        }
    }

    // ---- Lifecycle ----

    /// Stop background work and close every container. Idempotent; later
    /// calls fail with [`ServiceError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cleaner = self
            .cleaner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut cleaner) = cleaner {
            cleaner.shutdown();
        }
        self.store.dispose();
        if let Err(e) = self.indexer.dispose() {
            warn!(component = "indexer", error = %e, "dispose failed");
        }
        if let Err(e) = self.ids.dispose() {
            warn!(component = "ids", error = %e, "dispose failed");
        }
        if let Err(e) = self.versions.dispose() {
            warn!(component = "versions", error = %e, "dispose failed");
        }
        if let Err(e) = self.metadata.dispose() {
            warn!(component = "metadata", error = %e, "dispose failed");
        }
        info!("object service disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    // ---- Internals ----

    fn check_open(&self) -> ServiceResult<()> {
        if self.is_disposed() {
            return Err(ServiceError::Disposed);
        }
        Ok(())
    }

    fn validate_records(&self, name: &ObjectTypeName, objects: &[ObjectRecord]) -> ServiceResult<()> {
        let current = self.ids.current(&name.full_name())?;
        for object in objects {
            self.indexer.validate_values(name, &object.indexes)?;
            if let Some(id) = object.id {
                if id == 0 || id > current {
                    return Err(ServiceError::Validation(format!(
                        "{name} has never allocated id {id}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Give new records an ID and, where the schema requires one, records
    /// without a key a unique key. An update without a key keeps the key
    /// already stored. Nothing is changed if this fails.
    fn assign_identities(
        &self,
        name: &ObjectTypeName,
        schema: &ObjectTypeSchema,
        objects: &mut [ObjectRecord],
    ) -> ServiceResult<Assigned> {
        let mut keys = Vec::new();
        if schema.requires_unique_key {
            for (i, object) in objects.iter().enumerate() {
                if object.unique_key.as_ref().is_some_and(|k| !k.is_empty()) {
                    continue;
                }
                let stored = match object.id {
                    Some(id) => self.store.get_entry(name, id)?.and_then(|e| e.unique_key),
                    None => None,
                };
                keys.push((i, stored.unwrap_or_else(new_unique_key)));
            }
        }

        let mut assigned = Assigned {
            id_slots: objects
                .iter()
                .enumerate()
                .filter(|(_, o)| o.id.is_none())
                .map(|(i, _)| i)
                .collect(),
            ..Default::default()
        };
        if !assigned.id_slots.is_empty() {
            let range = self
                .ids
                .reserve(&name.full_name(), assigned.id_slots.len() as u32)?;
            for (slot, id) in assigned.id_slots.iter().zip(range.clone()) {
                objects[*slot].id = Some(id);
            }
            assigned.ids = Some(range);
        }
        for (slot, key) in keys {
            objects[slot].unique_key = Some(key);
            assigned.key_slots.push(slot);
        }
        Ok(assigned)
    }

    fn release_identities(
        &self,
        name: &ObjectTypeName,
        objects: &mut [ObjectRecord],
        assigned: Assigned,
    ) {
        for slot in assigned.id_slots {
            objects[slot].id = None;
        }
        for slot in assigned.key_slots {
            objects[slot].unique_key = None;
        }
        if let Some(range) = assigned.ids {
            match self.ids.release(&name.full_name(), range) {
                Ok(true) => {}
                Ok(false) => debug!(object_type = %name, "IDs allocated concurrently; not reclaimed"),
                Err(e) => warn!(object_type = %name, error = %e, "failed to release IDs"),
            }
        }
    }

    fn write_records(&self, name: &ObjectTypeName, objects: &[ObjectRecord]) -> ServiceResult<Vec<u32>> {
        let mut scope = TransactionScope::new("store");
        let mut ids = Vec::with_capacity(objects.len());
        for object in objects {
            let id = object
                .id
                .ok_or_else(|| ServiceError::Validation("object has no id".into()))?;

            let previous = self.store.get_entry(name, id)?;
            self.store.set(
                name,
                &StoredEntry {
                    id,
                    unique_key: object.unique_key.clone(),
                    value: object.value.clone(),
                },
            )?;
            scope.on_rollback("payload", move || match previous {
                Some(entry) => self.store.set(name, &entry),
                None => self.store.remove(name, id).map(|_| ()),
            });

            let previous_index = self.indexer.index_values(name, id)?;
            self.indexer.upsert(name, id, &object.indexes)?;
            scope.on_rollback("index", move || match previous_index {
                Some(values) => self.indexer.upsert(name, id, &values),
                None => self.indexer.remove(name, id).map(|_| ()),
            });
            ids.push(id);
        }
        self.versions.update(&name.full_name())?;
        scope.commit();
        Ok(ids)
    }

    /// Delete everything stored for a type except its metadata.
    fn drop_data(&self, name: &ObjectTypeName) -> ServiceResult<()> {
        self.drop_storage(name)?;
        self.versions.remove(&name.full_name())?;
        Ok(())
    }

    /// Delete a type's objects, indexes and ID counter.
    fn drop_storage(&self, name: &ObjectTypeName) -> ServiceResult<()> {
        self.indexer.unprovision(name)?;
        self.store.destroy(name)?;
        self.ids.remove(&name.full_name())?;
        Ok(())
    }

    fn to_record(&self, name: &ObjectTypeName, entry: StoredEntry) -> ServiceResult<ObjectRecord> {
        let indexes = self.indexer.index_values(name, entry.id)?.unwrap_or_default();
        Ok(ObjectRecord {
            id: Some(entry.id),
            unique_key: entry.unique_key,
            value: entry.value,
            indexes,
        })
    }
}

impl Drop for ObjectService {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ObjectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectService")
            .field("cache", &self.cache.is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ostore_index::{Constraint, Operator};
    use ostore_kv::{Container, KvError, KvResult};
    use ostore_types::{IndexKind, IndexValue};

    fn service() -> ObjectService {
        let svc = ObjectService::in_memory(ServiceConfig::default()).unwrap();
        svc.create_namespace("Shop").unwrap();
        svc
    }

    fn order_schema() -> ObjectTypeSchema {
        ObjectTypeSchema::new("Order")
            .with_index("qty", IndexKind::Integer)
            .with_index("sku", IndexKind::Text)
    }

    fn order(qty: i64, sku: &str) -> ObjectRecord {
        ObjectRecord::new(format!("{sku} x{qty}"))
            .with_index("qty", IndexValue::Integer(qty))
            .with_index("sku", IndexValue::Text(sku.into()))
    }

    fn qty_eq(n: i64) -> Query {
        Query::new().with(Constraint::eq("qty", IndexValue::Integer(n)))
    }

    /// Memory provider whose index containers reject writes while `fail` is set.
    struct FailingIndexes {
        inner: MemoryContainerProvider,
        fail: Arc<AtomicBool>,
    }

    struct FailingContainer {
        inner: Arc<dyn Container>,
        fail: Arc<AtomicBool>,
    }

    impl Container for FailingContainer {
        fn path(&self) -> &str {
            self.inner.path()
        }
        fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(KvError::Io(std::io::Error::new(std::io::ErrorKind::Other, "injected failure")));
            }
            self.inner.set(key, value)
        }
        fn delete(&self, key: &[u8]) -> KvResult<bool> {
            self.inner.delete(key)
        }
        fn enumerate(&self) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
            self.inner.enumerate()
        }
        fn truncate(&self) -> KvResult<()> {
            self.inner.truncate()
        }
        fn dispose(&self) -> KvResult<()> {
            self.inner.dispose()
        }
        fn is_disposed(&self) -> bool {
            self.inner.is_disposed()
        }
    }

    impl ContainerProvider for FailingIndexes {
        fn open(&self, path: &str) -> KvResult<Arc<dyn Container>> {
            let inner = self.inner.open(path)?;
            if path.starts_with("Index/") {
                return Ok(Arc::new(FailingContainer {
                    inner,
                    fail: Arc::clone(&self.fail),
                }));
            }
            Ok(inner)
        }
        fn exists(&self, path: &str) -> KvResult<bool> {
            self.inner.exists(path)
        }
        fn destroy(&self, path: &str) -> KvResult<bool> {
            self.inner.destroy(path)
        }
    }

    #[test]
    fn store_assigns_ids_and_reads_back() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();

        let mut objects = vec![order(1, "apple"), order(2, "pear")];
        assert_eq!(svc.store(&name, &mut objects).unwrap(), vec![1, 2]);
        assert_eq!(objects[0].id, Some(1));

        let read = svc.get(&name, 2).unwrap().unwrap();
        assert_eq!(read.value, b"pear x2");
        assert_eq!(read.indexes, objects[1].indexes);
        assert!(svc.get(&name, 99).unwrap().is_none());
        assert_eq!(svc.count(&name).unwrap(), 2);
        assert_eq!(svc.get_many(&name, &[2, 7, 1]).unwrap().len(), 2);
        assert_eq!(svc.version(&name).unwrap(), 1);
    }

    #[test]
    fn update_keeps_id_and_replaces_indexes() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple")]).unwrap();

        let mut update = [order(5, "apple").with_id(1)];
        assert_eq!(svc.store(&name, &mut update).unwrap(), vec![1]);
        assert!(svc.find_ids(&name, &qty_eq(1)).unwrap().is_empty());
        assert_eq!(svc.find_ids(&name, &qty_eq(5)).unwrap(), vec![1]);
        assert_eq!(svc.count(&name).unwrap(), 1);
    }

    #[test]
    fn unallocated_explicit_id_rejected() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        let err = svc.store(&name, &mut [order(1, "apple").with_id(4)]).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(svc.count(&name).unwrap(), 0);
        assert_eq!(svc.version(&name).unwrap(), 0);
    }

    #[test]
    fn invalid_index_values_change_nothing() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        let mut objects = vec![
            order(1, "apple"),
            ObjectRecord::new("bad").with_index("qty", IndexValue::Text("many".into())),
        ];
        assert!(svc.store(&name, &mut objects).unwrap_err().is_validation());
        assert!(objects.iter().all(|o| o.id.is_none()));
        assert_eq!(svc.store(&name, &mut [order(1, "apple")]).unwrap(), vec![1]);
    }

    #[test]
    fn unique_keys_generated_and_resolved() {
        let svc = service();
        let name = svc
            .provision("Shop", ObjectTypeSchema::new("Customer").with_unique_key())
            .unwrap();

        let mut objects = vec![
            ObjectRecord::new("generated"),
            ObjectRecord::new("given").with_unique_key(b"alice".to_vec()),
        ];
        svc.store(&name, &mut objects).unwrap();
        let generated = objects[0].unique_key.clone().unwrap();
        assert_eq!(generated.len(), 16);

        assert_eq!(svc.get_by_key(&name, &generated).unwrap().unwrap().id, Some(1));
        let alice = svc.get_by_key(&name, b"alice").unwrap().unwrap();
        assert_eq!(alice.value, b"given");
        assert_eq!(alice.unique_key.as_deref(), Some(&b"alice"[..]));

        assert!(svc.remove_by_key(&name, b"alice").unwrap());
        assert!(!svc.remove_by_key(&name, b"alice").unwrap());
        assert!(svc.get_by_key(&name, b"alice").unwrap().is_none());
        assert_eq!(svc.count(&name).unwrap(), 1);
    }

    #[test]
    fn dependency_versions_propagate() {
        let svc = service();
        let customer = svc.provision("Shop", ObjectTypeSchema::new("Customer")).unwrap();
        let orders = svc
            .provision("Shop", order_schema().with_dependency("Customer"))
            .unwrap();

        svc.store(&customer, &mut [ObjectRecord::new("bob")]).unwrap();
        assert_eq!(svc.version(&customer).unwrap(), 1);
        assert_eq!(svc.version(&orders).unwrap(), 1);

        svc.store(&orders, &mut [order(1, "apple")]).unwrap();
        assert_eq!(svc.version(&orders).unwrap(), 2);
        assert_eq!(svc.version(&customer).unwrap(), 1);
    }

    #[test]
    fn cached_query_sees_new_objects() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple")]).unwrap();

        assert_eq!(svc.find_ids(&name, &qty_eq(1)).unwrap(), vec![1]);
        assert_eq!(svc.find_ids(&name, &qty_eq(1)).unwrap(), vec![1]);
        let totals = svc.cache_totals().unwrap();
        assert_eq!(totals.queries, 1);

        svc.store(&name, &mut [order(1, "pear")]).unwrap();
        assert_eq!(svc.find_ids(&name, &qty_eq(1)).unwrap(), vec![1, 2]);

        svc.remove(&name, 1).unwrap();
        let found = svc.find(&name, &qty_eq(1)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, b"pear x1");
    }

    #[test]
    fn cache_can_be_disabled() {
        let mut config = ServiceConfig::default();
        config.cache.enabled = false;
        let svc = ObjectService::in_memory(config).unwrap();
        svc.create_namespace("Shop").unwrap();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(3, "fig")]).unwrap();
        assert_eq!(svc.find_ids(&name, &qty_eq(3)).unwrap(), vec![1]);
        assert!(svc.cache_totals().is_none());
        svc.reset_cache();
    }

    #[test]
    fn typed_query_from_terms() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple"), order(4, "apricot"), order(9, "pear")])
            .unwrap();

        let terms: Vec<RawConstraint> = vec!["qty>=2".parse().unwrap(), "sku^=ap".parse().unwrap()];
        let query = svc.typed_query(&name, &terms, None).unwrap();
        assert_eq!(query.constraints[0].op, Operator::Ge);
        assert_eq!(svc.find_ids(&name, &query).unwrap(), vec![2]);

        let unknown: Vec<RawConstraint> = vec!["color=red".parse().unwrap()];
        assert!(svc.typed_query(&name, &unknown, None).unwrap_err().is_validation());
    }

    #[test]
    fn reprovision_fails_and_keeps_data() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple")]).unwrap();

        let err = svc.provision("Shop", order_schema()).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(svc.count(&name).unwrap(), 1);
        assert_eq!(svc.find_ids(&name, &qty_eq(1)).unwrap(), vec![1]);
    }

    #[test]
    fn failed_store_rolls_back_ids_and_keys() {
        let fail = Arc::new(AtomicBool::new(false));
        let kv = Arc::new(FailingIndexes {
            inner: MemoryContainerProvider::new(),
            fail: Arc::clone(&fail),
        });
        let svc = ObjectService::open(kv, ServiceConfig::default()).unwrap();
        svc.create_namespace("Shop").unwrap();
        let name = svc
            .provision("Shop", order_schema().with_unique_key())
            .unwrap();
        svc.store(&name, &mut [order(1, "apple")]).unwrap();

        fail.store(true, Ordering::SeqCst);
        let mut objects = vec![order(2, "pear"), order(3, "fig")];
        assert!(svc.store(&name, &mut objects).is_err());
        assert!(objects.iter().all(|o| o.id.is_none() && o.unique_key.is_none()));
        assert_eq!(svc.count(&name).unwrap(), 1);
        assert_eq!(svc.version(&name).unwrap(), 1);

        let mut update = [order(7, "apple").with_id(1)];
        assert!(svc.store(&name, &mut update).is_err());
        assert_eq!(svc.get(&name, 1).unwrap().unwrap().value, b"apple x1");

        fail.store(false, Ordering::SeqCst);
        assert_eq!(svc.store(&name, &mut objects).unwrap(), vec![2, 3]);
    }

    #[test]
    fn truncate_and_remove_bump_version() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple"), order(2, "pear")]).unwrap();

        assert!(svc.remove(&name, 1).unwrap());
        assert_eq!(svc.version(&name).unwrap(), 2);
        assert!(!svc.remove(&name, 1).unwrap());
        assert_eq!(svc.version(&name).unwrap(), 2);

        svc.truncate(&name).unwrap();
        assert_eq!(svc.version(&name).unwrap(), 3);
        assert_eq!(svc.count(&name).unwrap(), 0);
        assert!(svc.find_ids(&name, &qty_eq(2)).unwrap().is_empty());
        assert_eq!(svc.store(&name, &mut [order(1, "kiwi")]).unwrap(), vec![3]);
    }

    #[test]
    fn iterate_orders_by_id() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "a"), order(2, "b"), order(3, "c")])
            .unwrap();
        svc.remove(&name, 2).unwrap();
        let ids: Vec<_> = svc.iterate(&name).unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
    }

    #[test]
    fn unprovision_removes_everything() {
        let svc = service();
        let customer = svc.provision("Shop", ObjectTypeSchema::new("Customer")).unwrap();
        let orders = svc
            .provision("Shop", order_schema().with_dependency("Customer"))
            .unwrap();
        svc.store(&customer, &mut [ObjectRecord::new("bob")]).unwrap();
        assert_eq!(svc.version(&orders).unwrap(), 1);

        svc.unprovision(&customer).unwrap();
        assert_eq!(svc.version(&orders).unwrap(), 2);
        assert!(svc.schema(&customer).unwrap_err().is_validation());
        assert!(svc.count(&customer).is_err());

        let customer = svc.provision("Shop", ObjectTypeSchema::new("Customer")).unwrap();
        assert_eq!(svc.count(&customer).unwrap(), 0);
        assert_eq!(svc.version(&customer).unwrap(), 0);
        assert_eq!(svc.store(&customer, &mut [ObjectRecord::new("eve")]).unwrap(), vec![1]);
    }

    #[test]
    fn remove_namespace_drops_types() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple")]).unwrap();

        svc.remove_namespace("Shop").unwrap();
        assert!(svc.namespaces().unwrap().is_empty());
        assert!(svc.object_types("Shop").is_err());

        svc.create_namespace("Shop").unwrap();
        let name = svc.provision("Shop", order_schema()).unwrap();
        assert_eq!(svc.count(&name).unwrap(), 0);
        assert_eq!(svc.store(&name, &mut [order(1, "apple")]).unwrap(), vec![1]);
    }

    #[test]
    fn remove_namespace_leaves_no_dependent_versions() {
        let svc = service();
        let base = svc.provision("Shop", ObjectTypeSchema::new("Zz")).unwrap();
        let dependent = svc
            .provision("Shop", ObjectTypeSchema::new("Aa").with_dependency("Zz"))
            .unwrap();
        svc.store(&base, &mut [ObjectRecord::new("z")]).unwrap();
        svc.store(&dependent, &mut [ObjectRecord::new("a")]).unwrap();
        assert_eq!(svc.version(&dependent).unwrap(), 2);

        svc.remove_namespace("Shop").unwrap();
        assert_eq!(svc.versions().current("Shop.Aa").unwrap(), 0);
        assert_eq!(svc.versions().current("Shop.Zz").unwrap(), 0);

        svc.create_namespace("Shop").unwrap();
        let base = svc.provision("Shop", ObjectTypeSchema::new("Zz")).unwrap();
        let dependent = svc
            .provision("Shop", ObjectTypeSchema::new("Aa").with_dependency("Zz"))
            .unwrap();
        assert_eq!(svc.version(&base).unwrap(), 0);
        assert_eq!(svc.version(&dependent).unwrap(), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key;
        {
            let svc = ObjectService::open_dir(dir.path(), ServiceConfig::default()).unwrap();
            svc.create_namespace("Shop").unwrap();
            let name = svc
                .provision("Shop", order_schema().with_unique_key())
                .unwrap();
            let mut objects = vec![order(1, "apple"), order(2, "pear")];
            svc.store(&name, &mut objects).unwrap();
            key = objects[1].unique_key.clone().unwrap();
        }

        let svc = ObjectService::open_dir(dir.path(), ServiceConfig::default()).unwrap();
        let name = ObjectTypeName::new("Shop", "Order").unwrap();
        assert_eq!(svc.schema(&name).unwrap(), order_schema().with_unique_key());
        assert_eq!(svc.version(&name).unwrap(), 1);
        assert_eq!(svc.get_by_key(&name, &key).unwrap().unwrap().id, Some(2));
        assert_eq!(svc.find_ids(&name, &qty_eq(1)).unwrap(), vec![1]);
        assert_eq!(svc.store(&name, &mut [order(3, "fig")]).unwrap(), vec![3]);
    }

    #[test]
    fn disposed_service_rejects_calls() {
        let svc = service();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.dispose();
        svc.dispose();
        assert!(svc.is_disposed());
        assert!(matches!(svc.get(&name, 1), Err(ServiceError::Disposed)));
        assert!(matches!(
            svc.store(&name, &mut [order(1, "apple")]),
            Err(ServiceError::Disposed)
        ));
        assert!(matches!(svc.namespaces(), Err(ServiceError::Disposed)));
    }

    /// Memory provider that keeps every handle it hands out.
    #[derive(Default)]
    struct TrackingProvider {
        inner: MemoryContainerProvider,
        handles: Arc<Mutex<Vec<Arc<dyn Container>>>>,
    }

    impl ContainerProvider for TrackingProvider {
        fn open(&self, path: &str) -> KvResult<Arc<dyn Container>> {
            let handle = self.inner.open(path)?;
            self.handles.lock().unwrap().push(Arc::clone(&handle));
            Ok(handle)
        }
        fn exists(&self, path: &str) -> KvResult<bool> {
            self.inner.exists(path)
        }
        fn destroy(&self, path: &str) -> KvResult<bool> {
            self.inner.destroy(path)
        }
    }

    #[test]
    fn dispose_closes_every_container() {
        let tracking = TrackingProvider::default();
        let handles = Arc::clone(&tracking.handles);
        let svc = ObjectService::open(Arc::new(tracking), ServiceConfig::default()).unwrap();
        svc.create_namespace("Shop").unwrap();
        let name = svc.provision("Shop", order_schema()).unwrap();
        svc.store(&name, &mut [order(1, "apple")]).unwrap();
        assert_eq!(svc.find_ids(&name, &qty_eq(1)).unwrap(), vec![1]);

        svc.dispose();
        assert!(svc.metadata().is_disposed());
        assert!(svc.versions().is_disposed());
        let handles = handles.lock().unwrap();
        assert!(handles.len() >= 5);
        for handle in handles.iter() {
            assert!(handle.is_disposed(), "{} left open", handle.path());
        }
    }
}
