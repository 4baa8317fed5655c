use ostore_types::{IndexKind, ObjectTypeName};

/// Errors from index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("indexes for {0} are not provisioned")]
    NotProvisioned(ObjectTypeName),

    #[error("indexes for {0} are already provisioned")]
    AlreadyProvisioned(ObjectTypeName),

    #[error("{object_type} has no index named {index}")]
    UnknownIndex {
        object_type: ObjectTypeName,
        index: String,
    },

    #[error("index {index} of {object_type} holds {expected} values, got {actual}")]
    KindMismatch {
        object_type: ObjectTypeName,
        index: String,
        expected: IndexKind,
        actual: IndexKind,
    },

    #[error("index {index} of {object_type} given more than one value")]
    DuplicateValue {
        object_type: ObjectTypeName,
        index: String,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("corrupt index record for {object_type} id {id}: {reason}")]
    Corrupt {
        object_type: ObjectTypeName,
        id: u32,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Meta(#[from] ostore_meta::MetaError),

    #[error("container error: {0}")]
    Kv(#[from] ostore_kv::KvError),
}

impl IndexError {
    /// Errors caused by the caller's input rather than by storage.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::NotProvisioned(_)
            | Self::AlreadyProvisioned(_)
            | Self::UnknownIndex { .. }
            | Self::KindMismatch { .. }
            | Self::DuplicateValue { .. }
            | Self::InvalidQuery(_) => true,
            Self::Meta(e) => e.is_validation(),
            Self::Corrupt { .. } | Self::Serialization(_) | Self::Kv(_) => false,
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
