/// Errors from object and ID store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object store is disposed")]
    Disposed,

    /// The type's 32-bit ID space is used up.
    #[error("no IDs left for {0}")]
    IdsExhausted(String),

    #[error("cannot reserve zero IDs for {0}")]
    EmptyReservation(String),

    #[error("failed to start sweep thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("container error: {0}")]
    Kv(#[from] ostore_kv::KvError),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] ostore_types::TypeError),
}

pub type StoreResult<T> = Result<T, StoreError>;
