use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use ostore_kv::{container_path, Container, ContainerProvider};
use ostore_types::{decode_u32, encode_u32, IndexDefinition, NamedIndexValue, ObjectTypeName};

use crate::error::{IndexError, IndexResult};
use crate::query::Query;

/// Root of the per-type index containers.
pub const INDEX_ROOT: &str = "Index";

/// Backend that stores index values and executes constraint queries.
///
/// All implementations must satisfy these invariants:
/// - `find` returns matching IDs in ascending order, at most `query.top`.
/// - Operations on an unprovisioned type fail with
///   [`IndexError::NotProvisioned`].
pub trait IndexProvider: Send + Sync {
    /// Create index storage for a type.
    fn provision(&self, object_type: &ObjectTypeName, indexes: &[IndexDefinition])
        -> IndexResult<()>;

    /// Drop a type's index storage. Returns `true` if it existed.
    fn unprovision(&self, object_type: &ObjectTypeName) -> IndexResult<bool>;

    fn is_provisioned(&self, object_type: &ObjectTypeName) -> IndexResult<bool>;

    /// Replace the index values of one object.
    fn upsert(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
        values: &[NamedIndexValue],
    ) -> IndexResult<()>;

    /// Forget one object's index values. Returns `true` if it had any.
    fn remove(&self, object_type: &ObjectTypeName, id: u32) -> IndexResult<bool>;

    fn index_values(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
    ) -> IndexResult<Option<Vec<NamedIndexValue>>>;

    fn truncate(&self, object_type: &ObjectTypeName) -> IndexResult<()>;

    fn find(&self, object_type: &ObjectTypeName, query: &Query) -> IndexResult<Vec<u32>>;

    /// Release every open handle. Returns how many were closed.
    fn dispose(&self) -> IndexResult<usize> {
        Ok(0)
    }
}

/// [`IndexProvider`] over key-value containers.
///
/// `Index/<type>` maps a 4-byte little-endian ID to the bincode-encoded
/// index values of that object. Queries scan the whole container.
pub struct ContainerIndexProvider {
    provider: Arc<dyn ContainerProvider>,
    root: String,
    open: RwLock<HashMap<String, Arc<dyn Container>>>,
}

impl ContainerIndexProvider {
    pub fn new(provider: Arc<dyn ContainerProvider>) -> Self {
        Self::with_root(provider, INDEX_ROOT)
    }

    pub fn with_root(provider: Arc<dyn ContainerProvider>, root: impl Into<String>) -> Self {
        Self {
            provider,
            root: root.into(),
            open: RwLock::new(HashMap::new()),
        }
    }

    fn path(&self, object_type: &ObjectTypeName) -> String {
        container_path(&self.root, &object_type.full_name())
    }

    /// Container of a provisioned type.
    fn container(&self, object_type: &ObjectTypeName) -> IndexResult<Arc<dyn Container>> {
        let full = object_type.full_name();
        if let Some(container) = self
            .open
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&full)
            .filter(|c| !c.is_disposed())
        {
            return Ok(Arc::clone(container));
        }

        let path = self.path(object_type);
        if !self.provider.exists(&path)? {
            return Err(IndexError::NotProvisioned(object_type.clone()));
        }
        let container = self.provider.open(&path)?;
        self.open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(full, Arc::clone(&container));
        Ok(container)
    }

    fn decode(
        object_type: &ObjectTypeName,
        id: u32,
        bytes: &[u8],
    ) -> IndexResult<Vec<NamedIndexValue>> {
        bincode::deserialize(bytes).map_err(|e| IndexError::Corrupt {
            object_type: object_type.clone(),
            id,
            reason: e.to_string(),
        })
    }
}

impl IndexProvider for ContainerIndexProvider {
    fn provision(
        &self,
        object_type: &ObjectTypeName,
        indexes: &[IndexDefinition],
    ) -> IndexResult<()> {
        let path = self.path(object_type);
        if self.provider.exists(&path)? {
            return Err(IndexError::AlreadyProvisioned(object_type.clone()));
        }
        let container = self.provider.open(&path)?;
        self.open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object_type.full_name(), container);
        info!(object_type = %object_type, indexes = indexes.len(), "indexes provisioned");
        Ok(())
    }

    fn unprovision(&self, object_type: &ObjectTypeName) -> IndexResult<bool> {
        let cached = self
            .open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&object_type.full_name());
        if let Some(container) = cached {
            if let Err(e) = container.dispose() {
                warn!(object_type = %object_type, error = %e, "failed to close index container");
            }
        }
        let existed = self.provider.destroy(&self.path(object_type))?;
        if existed {
            info!(object_type = %object_type, "indexes unprovisioned");
        }
        Ok(existed)
    }

    fn is_provisioned(&self, object_type: &ObjectTypeName) -> IndexResult<bool> {
        Ok(self.provider.exists(&self.path(object_type))?)
    }

    fn upsert(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
        values: &[NamedIndexValue],
    ) -> IndexResult<()> {
        let container = self.container(object_type)?;
        let bytes =
            bincode::serialize(values).map_err(|e| IndexError::Serialization(e.to_string()))?;
        container.set(&encode_u32(id), &bytes)?;
        debug!(object_type = %object_type, id, values = values.len(), "index values written");
        Ok(())
    }

    fn remove(&self, object_type: &ObjectTypeName, id: u32) -> IndexResult<bool> {
        Ok(self.container(object_type)?.delete(&encode_u32(id))?)
    }

    fn index_values(
        &self,
        object_type: &ObjectTypeName,
        id: u32,
    ) -> IndexResult<Option<Vec<NamedIndexValue>>> {
        match self.container(object_type)?.get(&encode_u32(id))? {
            Some(bytes) => Ok(Some(Self::decode(object_type, id, &bytes)?)),
            None => Ok(None),
        }
    }

    fn truncate(&self, object_type: &ObjectTypeName) -> IndexResult<()> {
        self.container(object_type)?.truncate()?;
        Ok(())
    }

    fn find(&self, object_type: &ObjectTypeName, query: &Query) -> IndexResult<Vec<u32>> {
        let container = self.container(object_type)?;
        let mut ids = Vec::new();
        for (key, bytes) in container.enumerate()? {
            let id = match decode_u32(&key) {
                Ok(id) => id,
                Err(e) => {
                    warn!(object_type = %object_type, error = %e, "skipping index record with malformed key");
                    continue;
                }
            };
            let values = Self::decode(object_type, id, &bytes)?;
            if query.matches(&values) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        if let Some(top) = query.top {
            ids.truncate(top);
        }
        Ok(ids)
    }

    fn dispose(&self) -> IndexResult<usize> {
        let open: Vec<_> = self
            .open
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let mut first_error = None;
        for (object_type, container) in &open {
            if let Err(e) = container.dispose() {
                warn!(object_type = %object_type, error = %e, "failed to close index container");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(open.len()),
        }
    }
}

impl std::fmt::Debug for ContainerIndexProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerIndexProvider")
            .field("root", &self.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Constraint, Operator};
    use ostore_kv::MemoryContainerProvider;
    use ostore_types::{IndexKind, IndexValue};

    fn order() -> ObjectTypeName {
        ObjectTypeName::new("Shop", "Order").unwrap()
    }

    fn provisioned() -> ContainerIndexProvider {
        let provider = ContainerIndexProvider::new(Arc::new(MemoryContainerProvider::new()));
        provider
            .provision(&order(), &[IndexDefinition::new("qty", IndexKind::Integer)])
            .unwrap();
        provider
    }

    fn qty(n: i64) -> Vec<NamedIndexValue> {
        vec![NamedIndexValue::new("qty", IndexValue::Integer(n))]
    }

    #[test]
    fn provision_twice_fails() {
        let provider = provisioned();
        assert!(provider.is_provisioned(&order()).unwrap());
        assert!(matches!(
            provider.provision(&order(), &[]),
            Err(IndexError::AlreadyProvisioned(_))
        ));
    }

    #[test]
    fn unprovisioned_type_rejected() {
        let provider = ContainerIndexProvider::new(Arc::new(MemoryContainerProvider::new()));
        assert!(matches!(
            provider.upsert(&order(), 1, &qty(1)),
            Err(IndexError::NotProvisioned(_))
        ));
        assert!(matches!(
            provider.find(&order(), &Query::new()),
            Err(IndexError::NotProvisioned(_))
        ));
    }

    #[test]
    fn upsert_replaces_values() {
        let provider = provisioned();
        provider.upsert(&order(), 1, &qty(1)).unwrap();
        provider.upsert(&order(), 1, &qty(9)).unwrap();
        assert_eq!(provider.index_values(&order(), 1).unwrap(), Some(qty(9)));
        assert!(provider.remove(&order(), 1).unwrap());
        assert_eq!(provider.index_values(&order(), 1).unwrap(), None);
    }

    #[test]
    fn find_orders_by_id_and_limits() {
        let provider = provisioned();
        for id in [300u32, 2, 17, 5] {
            provider.upsert(&order(), id, &qty(id as i64 % 2)).unwrap();
        }
        let query = Query::new().with(Constraint::eq("qty", IndexValue::Integer(1)));
        assert_eq!(provider.find(&order(), &query).unwrap(), vec![5, 17]);

        let all = Query::new().with(Constraint::new("qty", Operator::Ge, IndexValue::Integer(0)));
        assert_eq!(provider.find(&order(), &all).unwrap(), vec![2, 5, 17, 300]);
        assert_eq!(provider.find(&order(), &all.top(2)).unwrap(), vec![2, 5]);
    }

    #[test]
    fn unprovision_drops_values() {
        let provider = provisioned();
        provider.upsert(&order(), 1, &qty(1)).unwrap();
        assert!(provider.unprovision(&order()).unwrap());
        assert!(!provider.unprovision(&order()).unwrap());
        assert!(!provider.is_provisioned(&order()).unwrap());

        provider.provision(&order(), &[]).unwrap();
        assert_eq!(provider.find(&order(), &Query::new()).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn truncate_keeps_provisioning() {
        let provider = provisioned();
        provider.upsert(&order(), 1, &qty(1)).unwrap();
        provider.truncate(&order()).unwrap();
        assert!(provider.is_provisioned(&order()).unwrap());
        assert_eq!(provider.index_values(&order(), 1).unwrap(), None);
    }

    #[test]
    fn dispose_closes_open_containers() {
        let kv = Arc::new(MemoryContainerProvider::new());
        let provider = ContainerIndexProvider::new(kv.clone());
        provider
            .provision(&order(), &[IndexDefinition::new("qty", IndexKind::Integer)])
            .unwrap();
        provider.upsert(&order(), 1, &qty(4)).unwrap();
        let handle = provider.container(&order()).unwrap();

        assert_eq!(provider.dispose().unwrap(), 1);
        assert!(handle.is_disposed());
        assert_eq!(provider.dispose().unwrap(), 0);
        // Data outlives the handle.
        assert_eq!(provider.index_values(&order(), 1).unwrap(), Some(qty(4)));
    }
}
