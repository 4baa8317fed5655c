use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request was rejected before any state changed.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("object service is disposed")]
    Disposed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Type(#[from] ostore_types::TypeError),

    #[error(transparent)]
    Meta(#[from] ostore_meta::MetaError),

    #[error("version error: {0}")]
    Version(#[from] ostore_version::VersionError),

    #[error("cache error: {0}")]
    Cache(#[from] ostore_cache::CacheError),

    #[error("store error: {0}")]
    Store(#[from] ostore_store::StoreError),

    #[error("index error: {0}")]
    Index(#[from] ostore_index::IndexError),

    #[error("container error: {0}")]
    Kv(#[from] ostore_kv::KvError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Errors caused by the request itself; nothing was changed.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Type(_) => true,
            Self::Meta(e) => e.is_validation(),
            Self::Index(e) => e.is_validation(),
            _ => false,
        }
    }

    /// Transient lock contention; the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Version(e) if e.is_retryable())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
