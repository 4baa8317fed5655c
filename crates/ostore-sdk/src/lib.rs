//! High-level API for ostore.
//!
//! [`ObjectService`] is the entry point for applications embedding ostore.
//! It validates every request against the metadata store before touching
//! data, then coordinates the ID store, payload store, index provider and
//! version store for each operation. Multi-step writes run inside a
//! [`TransactionScope`] so a failure part way through undoes the steps
//! already applied.

pub mod config;
pub mod error;
pub mod service;
pub mod transaction;

pub use config::{
    CacheSection, IndexSection, MetadataSection, ServiceConfig, StoreSection, VersionSection,
};
pub use error::{ServiceError, ServiceResult};
pub use service::ObjectService;
pub use transaction::TransactionScope;

// Re-export key types
pub use ostore_cache::CacheTotals;
pub use ostore_index::{Constraint, Operator, Query, RawConstraint};
pub use ostore_kv::{FileConfig, FileContainerProvider, MemoryContainerProvider};
pub use ostore_types::{
    IndexDefinition, IndexKind, IndexValue, NamedIndexValue, ObjectRecord, ObjectTypeName,
    ObjectTypeSchema,
};
