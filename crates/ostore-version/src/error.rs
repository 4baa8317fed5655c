use std::time::Duration;

/// Errors from version store operations.
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// The read lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting to read version of {object_type}")]
    ReadTimeout {
        object_type: String,
        timeout: Duration,
    },

    /// The write lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting to update version of {object_type}")]
    WriteTimeout {
        object_type: String,
        timeout: Duration,
    },

    /// A persisted version record could not be decoded.
    #[error("corrupt version record for {object_type}: {source}")]
    Corrupt {
        object_type: String,
        source: ostore_types::TypeError,
    },

    #[error("container error: {0}")]
    Kv(#[from] ostore_kv::KvError),
}

impl VersionError {
    /// Timeouts are transient contention, not data loss.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ReadTimeout { .. } | Self::WriteTimeout { .. })
    }
}

/// Result alias for version store operations.
pub type VersionResult<T> = Result<T, VersionError>;
