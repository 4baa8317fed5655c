use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ostore_cache::{
    CleanerConfig, DEFAULT_CLEAN_FREQUENCY, DEFAULT_MAX_OBJECTS, DEFAULT_MAX_QUERIES,
    DEFAULT_REDUCTION_FACTOR,
};
use ostore_index::INDEX_ROOT;
use ostore_meta::{MetaConfig, DEFAULT_MAX_DEPENDENCIES, DEFAULT_METADATA_CONTAINER};
use ostore_store::{StoreConfig, DEFAULT_ID_CONTAINER, SECONDARY_STORE_ROOT, STORE_ROOT};
use ostore_version::{
    VersionConfig, DEFAULT_READ_TIMEOUT, DEFAULT_ROLLOVER, DEFAULT_VERSION_CONTAINER,
    DEFAULT_WRITE_TIMEOUT,
};

use crate::error::{ServiceError, ServiceResult};

/// Configuration of an [`ObjectService`](crate::ObjectService).
///
/// Every field has a default, so a TOML file only needs the values it
/// changes. Durations are whole milliseconds.
///
/// ```toml
/// [version]
/// rollover = 1000000
///
/// [cache]
/// enabled = true
/// max_queries = 5000
/// clean_frequency_ms = 30000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub version: VersionSection,
    pub cache: CacheSection,
    pub store: StoreSection,
    pub metadata: MetadataSection,
    pub index: IndexSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionSection {
    pub container: String,
    pub rollover: u32,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for VersionSection {
    fn default() -> Self {
        Self {
            container: DEFAULT_VERSION_CONTAINER.to_string(),
            rollover: DEFAULT_ROLLOVER,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub max_queries: usize,
    pub max_objects: usize,
    pub reduction_factor: usize,
    pub clean_frequency_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queries: DEFAULT_MAX_QUERIES,
            max_objects: DEFAULT_MAX_OBJECTS,
            reduction_factor: DEFAULT_REDUCTION_FACTOR,
            clean_frequency_ms: DEFAULT_CLEAN_FREQUENCY.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub store_root: String,
    pub secondary_root: String,
    pub id_container: String,
    pub auto_close: bool,
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            store_root: STORE_ROOT.to_string(),
            secondary_root: SECONDARY_STORE_ROOT.to_string(),
            id_container: DEFAULT_ID_CONTAINER.to_string(),
            auto_close: store.auto_close,
            idle_timeout_ms: store.idle_timeout.as_millis() as u64,
            sweep_interval_ms: store.sweep_interval.as_millis() as u64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataSection {
    pub container: String,
    pub max_dependencies: usize,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            container: DEFAULT_METADATA_CONTAINER.to_string(),
            max_dependencies: DEFAULT_MAX_DEPENDENCIES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    pub root: String,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            root: INDEX_ROOT.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> ServiceResult<Self> {
        toml::from_str(text).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> ServiceResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServiceError::Config(e.to_string()))
    }

    /// Check values no component can run with.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.version.rollover == 0 {
            return Err(ServiceError::Config("version.rollover must be positive".into()));
        }
        if self.cache.enabled {
            self.cleaner_config()
                .validate()
                .map_err(|e| ServiceError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn version_config(&self) -> VersionConfig {
        VersionConfig {
            container: self.version.container.clone(),
            rollover: self.version.rollover,
            read_timeout: Duration::from_millis(self.version.read_timeout_ms),
            write_timeout: Duration::from_millis(self.version.write_timeout_ms),
        }
    }

    pub fn cleaner_config(&self) -> CleanerConfig {
        CleanerConfig {
            max_queries: self.cache.max_queries,
            max_objects: self.cache.max_objects,
            reduction_factor: self.cache.reduction_factor,
            clean_frequency: Duration::from_millis(self.cache.clean_frequency_ms),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            store_root: self.store.store_root.clone(),
            secondary_root: self.store.secondary_root.clone(),
            auto_close: self.store.auto_close,
            idle_timeout: Duration::from_millis(self.store.idle_timeout_ms),
            sweep_interval: Duration::from_millis(self.store.sweep_interval_ms),
        }
    }

    pub fn meta_config(&self) -> MetaConfig {
        MetaConfig {
            container: self.metadata.container.clone(),
            max_dependencies: self.metadata.max_dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServiceConfig::default();
        assert_eq!(c.version.rollover, 10_000_000);
        assert_eq!(c.version.container, "VersionStore");
        assert_eq!(c.store.id_container, "IdStore");
        assert_eq!(c.metadata.container, "Metadata");
        assert_eq!(c.index.root, "Index");
        assert!(c.cache.enabled);
        assert_eq!(c.cleaner_config(), CleanerConfig::default());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = ServiceConfig::from_toml_str(
            r#"
            [version]
            rollover = 100
            read_timeout_ms = 250

            [cache]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(c.version.rollover, 100);
        assert_eq!(c.version_config().read_timeout, Duration::from_millis(250));
        assert_eq!(c.version_config().write_timeout, DEFAULT_WRITE_TIMEOUT);
        assert!(!c.cache.enabled);
        assert_eq!(c.cache.max_queries, DEFAULT_MAX_QUERIES);
        assert_eq!(c.store, StoreSection::default());
    }

    #[test]
    fn toml_round_trip() {
        let mut c = ServiceConfig::default();
        c.store.auto_close = false;
        c.cache.reduction_factor = 4;
        let text = c.to_toml_string().unwrap();
        assert_eq!(ServiceConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ostore.toml");
        std::fs::write(&path, "[metadata]\nmax_dependencies = 2\n").unwrap();
        let c = ServiceConfig::load(&path).unwrap();
        assert_eq!(c.meta_config().max_dependencies, 2);
    }

    #[test]
    fn invalid_values_rejected() {
        let bad = ServiceConfig::from_toml_str("[cache]\nreduction_factor = 1\n").unwrap();
        assert!(matches!(bad.validate(), Err(ServiceError::Config(_))));

        let disabled =
            ServiceConfig::from_toml_str("[cache]\nenabled = false\nreduction_factor = 1\n")
                .unwrap();
        assert!(disabled.validate().is_ok());

        assert!(matches!(
            ServiceConfig::from_toml_str("[version]\nrollover = \"lots\"\n"),
            Err(ServiceError::Config(_))
        ));
    }
}
