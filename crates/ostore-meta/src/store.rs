use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ostore_kv::{Container, ContainerProvider};
use ostore_types::{
    validate_name, DependencyResolver, Notifier, ObjectTypeName, ObjectTypeSchema,
};

use crate::error::{MetaError, MetaResult};
use crate::event::MetadataEvent;

/// Container holding the metadata documents.
pub const DEFAULT_METADATA_CONTAINER: &str = "Metadata";

/// Maximum number of dependencies one object type may declare.
pub const DEFAULT_MAX_DEPENDENCIES: usize = 8;

/// Configuration for the [`MetadataStore`].
#[derive(Clone, Debug)]
pub struct MetaConfig {
    pub container: String,
    pub max_dependencies: usize,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            container: DEFAULT_METADATA_CONTAINER.to_string(),
            max_dependencies: DEFAULT_MAX_DEPENDENCIES,
        }
    }
}

/// Persisted form of one namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct NamespaceDoc {
    name: String,
    types: BTreeMap<String, ObjectTypeSchema>,
}

/// Namespaces and object-type schemas.
///
/// One `RwLock` guards the in-memory documents; every mutation writes the
/// affected namespace document to the container before releasing the lock.
/// Events fire after the lock is released.
pub struct MetadataStore {
    container: Arc<dyn Container>,
    namespaces: RwLock<BTreeMap<String, NamespaceDoc>>,
    events: Notifier<MetadataEvent>,
    config: MetaConfig,
}

impl MetadataStore {
    /// Open the metadata container and load every namespace document.
    ///
    /// Documents that fail to decode are logged and skipped.
    pub fn open(provider: &dyn ContainerProvider, config: MetaConfig) -> MetaResult<Self> {
        let container = provider.open(&config.container)?;
        let mut namespaces = BTreeMap::new();
        for (key, value) in container.enumerate()? {
            match serde_json::from_slice::<NamespaceDoc>(&value) {
                Ok(doc) => {
                    namespaces.insert(doc.name.clone(), doc);
                }
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "skipping corrupt namespace document"
                    );
                }
            }
        }
        info!(namespaces = namespaces.len(), "metadata loaded");
        Ok(Self {
            container,
            namespaces: RwLock::new(namespaces),
            events: Notifier::new(),
            config,
        })
    }

    /// Change notifications.
    pub fn events(&self) -> &Notifier<MetadataEvent> {
        &self.events
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    /// Close the metadata container. In-memory documents stay readable.
    pub fn dispose(&self) -> MetaResult<()> {
        self.container.dispose()?;
        debug!(container = %self.config.container, "metadata store disposed");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.container.is_disposed()
    }

    // ---------------------------------------------------------------
    // Namespaces
    // ---------------------------------------------------------------

    pub fn create_namespace(&self, namespace: &str) -> MetaResult<()> {
        validate_name(namespace)?;
        {
            let mut map = self.write();
            if map.contains_key(namespace) {
                return Err(MetaError::NamespaceExists(namespace.to_string()));
            }
            let doc = NamespaceDoc {
                name: namespace.to_string(),
                types: BTreeMap::new(),
            };
            self.persist(&doc)?;
            map.insert(namespace.to_string(), doc);
        }
        info!(namespace, "namespace created");
        self.events
            .notify(MetadataEvent::NamespaceAdded(namespace.to_string()));
        Ok(())
    }

    /// Remove a namespace and every object type in it. Returns the removed
    /// types.
    pub fn remove_namespace(&self, namespace: &str) -> MetaResult<Vec<ObjectTypeName>> {
        let doc = {
            let mut map = self.write();
            if !map.contains_key(namespace) {
                return Err(MetaError::NamespaceNotFound(namespace.to_string()));
            }
            self.container.delete(namespace.as_bytes())?;
            map.remove(namespace).unwrap_or_default()
        };

        let mut removed = Vec::with_capacity(doc.types.len());
        for type_name in doc.types.keys() {
            let name = ObjectTypeName::new(namespace, type_name.as_str())?;
            self.events
                .notify(MetadataEvent::ObjectTypeRemoved(name.clone()));
            removed.push(name);
        }
        info!(namespace, types = removed.len(), "namespace removed");
        self.events
            .notify(MetadataEvent::NamespaceRemoved(namespace.to_string()));
        Ok(removed)
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.read().contains_key(namespace)
    }

    // ---------------------------------------------------------------
    // Object types
    // ---------------------------------------------------------------

    /// Check that `schema` could be added to `namespace`, without changing
    /// anything.
    pub fn validate_object_type(
        &self,
        namespace: &str,
        schema: &ObjectTypeSchema,
    ) -> MetaResult<ObjectTypeName> {
        let map = self.read();
        self.validate_locked(&map, namespace, schema)
    }

    /// Add an object type to an existing namespace.
    pub fn add_object_type(
        &self,
        namespace: &str,
        schema: ObjectTypeSchema,
    ) -> MetaResult<ObjectTypeName> {
        let name = {
            let mut map = self.write();
            let name = self.validate_locked(&map, namespace, &schema)?;
            let doc = map
                .get_mut(namespace)
                .ok_or_else(|| MetaError::NamespaceNotFound(namespace.to_string()))?;
            let mut updated = doc.clone();
            updated.types.insert(schema.name.clone(), schema);
            self.persist(&updated)?;
            *doc = updated;
            name
        };
        info!(object_type = %name, "object type added");
        self.events
            .notify(MetadataEvent::ObjectTypeAdded(name.clone()));
        Ok(name)
    }

    /// Remove an object type. Returns its schema.
    pub fn remove_object_type(&self, name: &ObjectTypeName) -> MetaResult<ObjectTypeSchema> {
        let schema = {
            let mut map = self.write();
            let doc = map
                .get_mut(name.namespace())
                .ok_or_else(|| MetaError::NamespaceNotFound(name.namespace().to_string()))?;
            let mut updated = doc.clone();
            let schema = updated
                .types
                .remove(name.name())
                .ok_or_else(|| MetaError::ObjectTypeNotFound(name.clone()))?;
            self.persist(&updated)?;
            *doc = updated;
            schema
        };
        info!(object_type = %name, "object type removed");
        self.events
            .notify(MetadataEvent::ObjectTypeRemoved(name.clone()));
        Ok(schema)
    }

    pub fn object_type(&self, name: &ObjectTypeName) -> Option<ObjectTypeSchema> {
        self.read()
            .get(name.namespace())
            .and_then(|doc| doc.types.get(name.name()))
            .cloned()
    }

    /// Like [`object_type`](Self::object_type) but reports which half of
    /// the name is unknown.
    pub fn require_object_type(&self, name: &ObjectTypeName) -> MetaResult<ObjectTypeSchema> {
        let map = self.read();
        let doc = map
            .get(name.namespace())
            .ok_or_else(|| MetaError::NamespaceNotFound(name.namespace().to_string()))?;
        doc.types
            .get(name.name())
            .cloned()
            .ok_or_else(|| MetaError::ObjectTypeNotFound(name.clone()))
    }

    pub fn object_types(&self, namespace: &str) -> MetaResult<Vec<ObjectTypeSchema>> {
        let map = self.read();
        let doc = map
            .get(namespace)
            .ok_or_else(|| MetaError::NamespaceNotFound(namespace.to_string()))?;
        Ok(doc.types.values().cloned().collect())
    }

    /// Types in the same namespace whose dependency list names `name`.
    pub fn dependents(&self, name: &ObjectTypeName) -> Vec<ObjectTypeName> {
        let map = self.read();
        let Some(doc) = map.get(name.namespace()) else {
            return Vec::new();
        };
        doc.types
            .values()
            .filter(|schema| schema.depends_on(name.name()))
            .filter_map(|schema| name.sibling(&schema.name).ok())
            .collect()
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn validate_locked(
        &self,
        map: &BTreeMap<String, NamespaceDoc>,
        namespace: &str,
        schema: &ObjectTypeSchema,
    ) -> MetaResult<ObjectTypeName> {
        let name = ObjectTypeName::new(namespace, schema.name.as_str())?;
        let doc = map
            .get(namespace)
            .ok_or_else(|| MetaError::NamespaceNotFound(namespace.to_string()))?;
        if doc.types.contains_key(&schema.name) {
            return Err(MetaError::ObjectTypeExists(name));
        }

        let mut seen = HashSet::new();
        for index in &schema.indexes {
            validate_name(&index.name)?;
            if !seen.insert(index.name.as_str()) {
                return Err(MetaError::DuplicateIndex {
                    name,
                    index: index.name.clone(),
                });
            }
        }

        if schema.dependencies.len() > self.config.max_dependencies {
            return Err(MetaError::TooManyDependencies {
                name,
                count: schema.dependencies.len(),
                max: self.config.max_dependencies,
            });
        }
        for dependency in &schema.dependencies {
            if *dependency == schema.name {
                return Err(MetaError::SelfDependency(name));
            }
            if !doc.types.contains_key(dependency) {
                return Err(MetaError::DependencyNotFound {
                    name,
                    dependency: dependency.clone(),
                });
            }
        }
        debug!(object_type = %name, "object type schema validated");
        Ok(name)
    }

    fn persist(&self, doc: &NamespaceDoc) -> MetaResult<()> {
        let bytes =
            serde_json::to_vec(doc).map_err(|e| MetaError::Serialization(e.to_string()))?;
        self.container.set(doc.name.as_bytes(), &bytes)?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, NamespaceDoc>> {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, NamespaceDoc>> {
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DependencyResolver for MetadataStore {
    fn dependents_of(&self, full_name: &str) -> Vec<String> {
        match ObjectTypeName::parse(full_name) {
            Ok(name) => self
                .dependents(&name)
                .into_iter()
                .map(|d| d.full_name())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("namespaces", &self.read().len())
            .field("config", &self.config)
            .finish()
    }
}
