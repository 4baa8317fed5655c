/// Errors from container operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The container handle was disposed.
    #[error("container disposed: {0}")]
    Disposed(String),

    /// The container path is malformed.
    #[error("invalid container path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A persisted record could not be decoded.
    #[error("corrupt record in {path} at offset {offset}: {reason}")]
    Corrupt {
        path: String,
        offset: u64,
        reason: String,
    },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for container operations.
pub type KvResult<T> = Result<T, KvError>;
