/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Query parameters must start with the object type's full name.
    #[error("query parameters are empty")]
    EmptyParameters,

    #[error("invalid cleaner configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start cleaner thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("version error: {0}")]
    Version(#[from] ostore_version::VersionError),
}

pub type CacheResult<T> = Result<T, CacheError>;
