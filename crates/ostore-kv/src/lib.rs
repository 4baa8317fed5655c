//! Key-value container substrate for ostore.
//!
//! Every persisted structure in ostore (versions, ID counters, object
//! payloads, secondary keys, index values, metadata) lives in a named
//! *container*: a flat map from byte-string keys to byte-string values.
//!
//! # Backends
//!
//! All backends implement [`ContainerProvider`] and hand out
//! [`Container`] handles:
//!
//! - [`MemoryContainerProvider`] -- `BTreeMap`-backed, for tests and embedding
//! - [`FileContainerProvider`] -- one CRC-framed append-only log per container
//!
//! # Rules
//!
//! 1. Container paths are `/`-separated segments, e.g. `Store/Shop.Order`.
//! 2. `enumerate` returns entries ordered by key.
//! 3. Operations on a disposed handle fail with [`KvError::Disposed`].
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod memory;
pub mod path;
pub mod traits;

pub use error::{KvError, KvResult};
pub use file::{FileConfig, FileContainer, FileContainerProvider, SyncMode};
pub use memory::{MemoryContainer, MemoryContainerProvider};
pub use path::{container_path, validate_path};
pub use traits::{Container, ContainerProvider};
