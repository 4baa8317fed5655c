use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use ostore_cache::IndexerCache;
use ostore_meta::MetadataStore;
use ostore_types::{IndexValue, NamedIndexValue, ObjectTypeName, ObjectTypeSchema};

use crate::error::{IndexError, IndexResult};
use crate::provider::IndexProvider;
use crate::query::{Constraint, Operator, Query, RawConstraint};

/// Schema-checked front end to an [`IndexProvider`], with optional result
/// caching.
pub struct ObjectIndexer {
    provider: Arc<dyn IndexProvider>,
    metadata: Arc<MetadataStore>,
    cache: Option<Arc<IndexerCache>>,
}

impl ObjectIndexer {
    pub fn new(
        provider: Arc<dyn IndexProvider>,
        metadata: Arc<MetadataStore>,
        cache: Option<Arc<IndexerCache>>,
    ) -> Self {
        Self {
            provider,
            metadata,
            cache,
        }
    }

    pub fn cache(&self) -> Option<&Arc<IndexerCache>> {
        self.cache.as_ref()
    }

    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------

    /// Check index values against the type's schema: every name declared,
    /// every value of the declared kind, at most one value per index.
    pub fn validate_values(
        &self,
        object_type: &ObjectTypeName,
        values: &[NamedIndexValue],
    ) -> IndexResult<()> {
        let schema = self.metadata.require_object_type(object_type)?;
        let mut seen = HashSet::new();
        for value in values {
            check_value(object_type, &schema, &value.name, &value.value)?;
            if !seen.insert(value.name.as_str()) {
                return Err(IndexError::DuplicateValue {
                    object_type: object_type.clone(),
                    index: value.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn validate_query(&self, object_type: &ObjectTypeName, query: &Query) -> IndexResult<()> {
        let schema = self.metadata.require_object_type(object_type)?;
        for constraint in &query.constraints {
            check_value(object_type, &schema, &constraint.index, &constraint.value)?;
            if constraint.op == Operator::StartsWith
                && !matches!(constraint.value, IndexValue::Text(_))
            {
                return Err(IndexError::InvalidQuery(format!(
                    "prefix match on non-text index {}",
                    constraint.index
                )));
            }
        }
        Ok(())
    }

    /// Type raw `index<op>literal` terms by the kinds declared in the schema.
    pub fn typed_query(
        &self,
        object_type: &ObjectTypeName,
        terms: &[RawConstraint],
        top: Option<usize>,
    ) -> IndexResult<Query> {
        let schema = self.metadata.require_object_type(object_type)?;
        let mut query = Query {
            constraints: Vec::with_capacity(terms.len()),
            top,
        };
        for term in terms {
            let definition = schema.index(&term.index).ok_or_else(|| IndexError::UnknownIndex {
                object_type: object_type.clone(),
                index: term.index.clone(),
            })?;
            let value = IndexValue::parse_as(definition.kind, &term.literal)
                .map_err(IndexError::InvalidQuery)?;
            query
                .constraints
                .push(Constraint::new(term.index.clone(), term.op, value));
        }
        Ok(query)
    }

    // ---------------------------------------------------------------
    // Provisioning
    // ---------------------------------------------------------------

    pub fn provision(
        &self,
        object_type: &ObjectTypeName,
        schema: &ObjectTypeSchema,
    ) -> IndexResult<()> {
        self.provider.provision(object_type, &schema.indexes)
    }

    pub fn unprovision(&self, object_type: &ObjectTypeName) -> IndexResult<bool> {
        self.provider.unprovision(object_type)
    }

    pub fn is_provisioned(&self, object_type: &ObjectTypeName) -> IndexResult<bool> {
        self.provider.is_provisioned(object_type)
    }

    /// Close the provider's open index storage.
    pub fn dispose(&self) -> IndexResult<usize> {
        self.provider.dispose()
    }

    // ---------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------

    /// Validate and write one object's index values.
    pub fn upsert(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
        values: &[NamedIndexValue],
    ) -> IndexResult<()> {
        self.validate_values(object_type, values)?;
        self.provider.upsert(object_type, id, values)
    }

    pub fn remove(&self, object_type: &ObjectTypeName, id: u32) -> IndexResult<bool> {
        self.provider.remove(object_type, id)
    }

    pub fn index_values(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
    ) -> IndexResult<Option<Vec<NamedIndexValue>>> {
        self.provider.index_values(object_type, id)
    }

    pub fn truncate(&self, object_type: &ObjectTypeName) -> IndexResult<()> {
        self.provider.truncate(object_type)
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// IDs matching `query`, ascending.
    ///
    /// With a cache attached, a hit skips the provider and a miss populates
    /// the cache. Cache failures fall back to the provider.
    pub fn find(&self, object_type: &ObjectTypeName, query: &Query) -> IndexResult<Vec<u32>> {
        self.validate_query(object_type, query)?;
        let Some(cache) = &self.cache else {
            return self.provider.find(object_type, query);
        };

        let params = cache_params(object_type, query)?;
        // Taken before the provider runs so a write committed meanwhile
        // keeps this result out of the cache.
        let version = match cache.version(&params[0]) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(object_type = %object_type, error = %e, "cache version lookup failed");
                None
            }
        };
        match cache.get(params.as_slice()) {
            Ok(Some(ids)) => {
                debug!(object_type = %object_type, hits = ids.len(), "query served from cache");
                return Ok(ids);
            }
            Ok(None) => {}
            Err(e) => warn!(object_type = %object_type, error = %e, "cache lookup failed"),
        }

        let ids = self.provider.find(object_type, query)?;
        if let Some(version) = version {
            if let Err(e) = cache.set_at(&ids, params.as_slice(), version) {
                warn!(object_type = %object_type, error = %e, "cache population failed");
            }
        }
        Ok(ids)
    }
}

impl std::fmt::Debug for ObjectIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectIndexer")
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

fn check_value(
    object_type: &ObjectTypeName,
    schema: &ObjectTypeSchema,
    index: &str,
    value: &IndexValue,
) -> IndexResult<()> {
    let definition = schema.index(index).ok_or_else(|| IndexError::UnknownIndex {
        object_type: object_type.clone(),
        index: index.to_string(),
    })?;
    if definition.kind != value.kind() {
        return Err(IndexError::KindMismatch {
            object_type: object_type.clone(),
            index: index.to_string(),
            expected: definition.kind,
            actual: value.kind(),
        });
    }
    Ok(())
}

/// Cache key parameters: the type's full name, one JSON term per
/// constraint, then the limit if any.
fn cache_params(object_type: &ObjectTypeName, query: &Query) -> IndexResult<Vec<String>> {
    let mut params = Vec::with_capacity(query.constraints.len() + 2);
    params.push(object_type.full_name());
    for constraint in &query.constraints {
        params.push(
            serde_json::to_string(constraint)
                .map_err(|e| IndexError::Serialization(e.to_string()))?,
        );
    }
    if let Some(top) = query.top {
        params.push(format!("top={top}"));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ContainerIndexProvider;
    use ostore_kv::MemoryContainerProvider;
    use ostore_meta::MetaConfig;
    use ostore_types::IndexKind;
    use ostore_version::{VersionConfig, VersionStore};

    struct Fixture {
        indexer: ObjectIndexer,
        versions: Arc<VersionStore>,
        name: ObjectTypeName,
    }

    fn fixture(cached: bool) -> Fixture {
        let kv = Arc::new(MemoryContainerProvider::new());
        let metadata = Arc::new(MetadataStore::open(kv.as_ref(), MetaConfig::default()).unwrap());
        metadata.create_namespace("Shop").unwrap();
        let schema = ObjectTypeSchema::new("Order")
            .with_index("qty", IndexKind::Integer)
            .with_index("sku", IndexKind::Text);
        let name = metadata.add_object_type("Shop", schema.clone()).unwrap();

        let versions = Arc::new(
            VersionStore::open(kv.as_ref(), metadata.clone(), VersionConfig::default()).unwrap(),
        );
        let cache = cached.then(|| IndexerCache::new(Arc::clone(&versions)));
        let provider = Arc::new(ContainerIndexProvider::new(kv));
        let indexer = ObjectIndexer::new(provider, metadata, cache);
        indexer.provision(&name, &schema).unwrap();
        Fixture {
            indexer,
            versions,
            name,
        }
    }

    fn values(qty: i64, sku: &str) -> Vec<NamedIndexValue> {
        vec![
            NamedIndexValue::new("qty", IndexValue::Integer(qty)),
            NamedIndexValue::new("sku", IndexValue::Text(sku.into())),
        ]
    }

    // ---- Validation ----

    #[test]
    fn unknown_index_rejected() {
        let f = fixture(false);
        let err = f
            .indexer
            .upsert(&f.name, 1, &[NamedIndexValue::new("color", IndexValue::Integer(1))])
            .unwrap_err();
        assert!(matches!(err, IndexError::UnknownIndex { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn kind_mismatch_rejected() {
        let f = fixture(false);
        let err = f
            .indexer
            .upsert(&f.name, 1, &[NamedIndexValue::new("qty", IndexValue::Text("x".into()))])
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::KindMismatch {
                expected: IndexKind::Integer,
                actual: IndexKind::Text,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_value_rejected() {
        let f = fixture(false);
        let dup = vec![
            NamedIndexValue::new("qty", IndexValue::Integer(1)),
            NamedIndexValue::new("qty", IndexValue::Integer(2)),
        ];
        assert!(matches!(
            f.indexer.validate_values(&f.name, &dup),
            Err(IndexError::DuplicateValue { .. })
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let f = fixture(false);
        let other = ObjectTypeName::new("Shop", "Nope").unwrap();
        let err = f.indexer.find(&other, &Query::new()).unwrap_err();
        assert!(matches!(err, IndexError::Meta(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn prefix_on_integer_rejected() {
        let f = fixture(false);
        let query = Query::new().with(Constraint::new(
            "qty",
            Operator::StartsWith,
            IndexValue::Integer(1),
        ));
        assert!(matches!(
            f.indexer.find(&f.name, &query),
            Err(IndexError::InvalidQuery(_))
        ));
    }

    #[test]
    fn raw_terms_are_typed_by_schema() {
        let f = fixture(false);
        let terms: Vec<RawConstraint> = vec!["qty>2".parse().unwrap(), "sku^=A".parse().unwrap()];
        let query = f.indexer.typed_query(&f.name, &terms, Some(3)).unwrap();
        assert_eq!(
            query.constraints[0],
            Constraint::new("qty", Operator::Gt, IndexValue::Integer(2))
        );
        assert_eq!(query.constraints[1].value, IndexValue::Text("A".into()));
        assert_eq!(query.top, Some(3));

        let bad: Vec<RawConstraint> = vec!["qty=two".parse().unwrap()];
        assert!(matches!(
            f.indexer.typed_query(&f.name, &bad, None),
            Err(IndexError::InvalidQuery(_))
        ));
    }

    // ---- Queries ----

    #[test]
    fn find_without_cache() {
        let f = fixture(false);
        f.indexer.upsert(&f.name, 1, &values(2, "A-1")).unwrap();
        f.indexer.upsert(&f.name, 2, &values(3, "B-1")).unwrap();
        f.indexer.upsert(&f.name, 3, &values(2, "A-2")).unwrap();

        let query = Query::new().with(Constraint::eq("qty", IndexValue::Integer(2)));
        assert_eq!(f.indexer.find(&f.name, &query).unwrap(), vec![1, 3]);
        assert!(f.indexer.cache().is_none());
    }

    #[test]
    fn find_populates_and_uses_cache() {
        let f = fixture(true);
        f.indexer.upsert(&f.name, 1, &values(2, "A-1")).unwrap();
        let query = Query::new().with(Constraint::eq("qty", IndexValue::Integer(2)));

        assert_eq!(f.indexer.find(&f.name, &query).unwrap(), vec![1]);
        let cache = f.indexer.cache().unwrap();
        assert_eq!(cache.totals().queries, 1);

        // Written without a version bump, so the cached result is served.
        f.indexer.upsert(&f.name, 2, &values(2, "A-2")).unwrap();
        assert_eq!(f.indexer.find(&f.name, &query).unwrap(), vec![1]);

        f.versions.update(&f.name.full_name()).unwrap();
        assert_eq!(f.indexer.find(&f.name, &query).unwrap(), vec![1, 2]);
    }

    /// Commits a write to the same type after computing each result.
    struct WritingProvider {
        inner: Arc<ContainerIndexProvider>,
        versions: Arc<VersionStore>,
        next_id: std::sync::atomic::AtomicU32,
    }

    impl IndexProvider for WritingProvider {
        fn provision(
            &self,
            object_type: &ObjectTypeName,
            indexes: &[ostore_types::IndexDefinition],
        ) -> IndexResult<()> {
            self.inner.provision(object_type, indexes)
        }
        fn unprovision(&self, object_type: &ObjectTypeName) -> IndexResult<bool> {
            self.inner.unprovision(object_type)
        }
        fn is_provisioned(&self, object_type: &ObjectTypeName) -> IndexResult<bool> {
            self.inner.is_provisioned(object_type)
        }
        fn upsert(
            &self,
            object_type: &ObjectTypeName,
            id: u32,
            values: &[NamedIndexValue],
        ) -> IndexResult<()> {
            self.inner.upsert(object_type, id, values)
        }
        fn remove(&self, object_type: &ObjectTypeName, id: u32) -> IndexResult<bool> {
            self.inner.remove(object_type, id)
        }
        fn index_values(
            &self,
            object_type: &ObjectTypeName,
            id: u32,
        ) -> IndexResult<Option<Vec<NamedIndexValue>>> {
            self.inner.index_values(object_type, id)
        }
        fn truncate(&self, object_type: &ObjectTypeName) -> IndexResult<()> {
            self.inner.truncate(object_type)
        }
        fn find(&self, object_type: &ObjectTypeName, query: &Query) -> IndexResult<Vec<u32>> {
            let ids = self.inner.find(object_type, query)?;
            let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if id == 2 {
                self.inner.upsert(object_type, id, &values(2, "A-2"))?;
                self.versions.update(&object_type.full_name()).unwrap();
            }
            Ok(ids)
        }
    }

    #[test]
    fn write_during_find_not_cached() {
        let kv = Arc::new(MemoryContainerProvider::new());
        let metadata = Arc::new(MetadataStore::open(kv.as_ref(), MetaConfig::default()).unwrap());
        metadata.create_namespace("Shop").unwrap();
        let schema = ObjectTypeSchema::new("Order")
            .with_index("qty", IndexKind::Integer)
            .with_index("sku", IndexKind::Text);
        let name = metadata.add_object_type("Shop", schema.clone()).unwrap();
        let versions = Arc::new(
            VersionStore::open(kv.as_ref(), metadata.clone(), VersionConfig::default()).unwrap(),
        );
        let provider = Arc::new(WritingProvider {
            inner: Arc::new(ContainerIndexProvider::new(kv)),
            versions: Arc::clone(&versions),
            next_id: std::sync::atomic::AtomicU32::new(2),
        });
        let cache = IndexerCache::new(Arc::clone(&versions));
        let indexer = ObjectIndexer::new(provider, metadata, Some(cache));
        indexer.provision(&name, &schema).unwrap();
        indexer.upsert(&name, 1, &values(2, "A-1")).unwrap();

        let query = Query::new().with(Constraint::eq("qty", IndexValue::Integer(2)));
        assert_eq!(indexer.find(&name, &query).unwrap(), vec![1]);
        assert_eq!(versions.current(&name.full_name()).unwrap(), 1);
        assert_eq!(indexer.find(&name, &query).unwrap(), vec![1, 2]);
        assert_eq!(indexer.find(&name, &query).unwrap(), vec![1, 2]);
        assert_eq!(indexer.cache().unwrap().totals().queries, 1);
    }

    #[test]
    fn top_is_part_of_cache_key() {
        let f = fixture(true);
        for id in 1..=5 {
            f.indexer.upsert(&f.name, id, &values(1, "X")).unwrap();
        }
        let query = Query::new().with(Constraint::eq("qty", IndexValue::Integer(1)));
        assert_eq!(f.indexer.find(&f.name, &query.clone().top(2)).unwrap(), vec![1, 2]);
        assert_eq!(f.indexer.find(&f.name, &query).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(f.indexer.cache().unwrap().totals().queries, 2);
    }

    #[test]
    fn cache_params_layout() {
        let name = ObjectTypeName::new("Shop", "Order").unwrap();
        let query = Query::new()
            .with(Constraint::eq("qty", IndexValue::Integer(2)))
            .top(10);
        assert_eq!(
            cache_params(&name, &query).unwrap(),
            vec![
                "Shop.Order".to_string(),
                r#"{"index":"qty","op":"eq","value":{"integer":2}}"#.to_string(),
                "top=10".to_string(),
            ]
        );
    }
}
