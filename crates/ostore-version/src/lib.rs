//! Version store for ostore.
//!
//! Every object type carries an unsigned 32-bit version that advances on
//! each mutating event for that type, and for every type that declares a
//! dependency on it. Versions drive invalidation of cached query results.
//!
//! # Rules
//!
//! 1. Versions start at 0 ("never bumped"); the first bump yields 1.
//! 2. Past the rollover ceiling the next version is 1, never 0.
//! 3. One reader/writer lock guards both the persisted records and the
//!    in-memory cache; acquisition is bounded and a timeout is an error the
//!    caller may retry.
//! 4. All increments of one `update`/`remove` are applied before any
//!    notification fires, and notifications fire outside the lock.

pub mod error;
pub mod event;
pub mod store;

pub use error::{VersionError, VersionResult};
pub use event::VersionEvent;
pub use store::{
    VersionConfig, VersionStore, DEFAULT_READ_TIMEOUT, DEFAULT_ROLLOVER,
    DEFAULT_VERSION_CONTAINER, DEFAULT_WRITE_TIMEOUT,
};
