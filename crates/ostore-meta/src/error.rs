//! Error types for metadata operations.

use ostore_types::{ObjectTypeName, TypeError};
use thiserror::Error;

/// Errors that can occur during metadata operations.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("object type not found: {0}")]
    ObjectTypeNotFound(ObjectTypeName),

    #[error("object type already exists: {0}")]
    ObjectTypeExists(ObjectTypeName),

    #[error("{name} declares {count} dependencies, limit is {max}")]
    TooManyDependencies {
        name: ObjectTypeName,
        count: usize,
        max: usize,
    },

    #[error("{name} depends on unknown object type {dependency}")]
    DependencyNotFound {
        name: ObjectTypeName,
        dependency: String,
    },

    #[error("{0} cannot depend on itself")]
    SelfDependency(ObjectTypeName),

    #[error("{name} declares index {index} more than once")]
    DuplicateIndex { name: ObjectTypeName, index: String },

    #[error(transparent)]
    InvalidName(#[from] TypeError),

    #[error("container error: {0}")]
    Kv(#[from] ostore_kv::KvError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl MetaError {
    /// Whether the error reports bad input rather than a storage failure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Kv(_) | Self::Serialization(_))
    }
}

/// Convenience alias for metadata results.
pub type MetaResult<T> = Result<T, MetaError>;
