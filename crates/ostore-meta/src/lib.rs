//! Metadata store for ostore.
//!
//! Holds every namespace and the schema of every object type in it (index
//! definitions, dependency list, unique-key policy), persisted as one JSON
//! document per namespace. Structural changes raise [`MetadataEvent`]s after
//! they are persisted, which the indexer cache uses to evict records of
//! removed types.
//!
//! # Modules
//!
//! - [`error`] -- Error types for metadata operations
//! - [`store`] -- The [`MetadataStore`] and its configuration
//! - [`event`] -- [`MetadataEvent`] change notifications

pub mod error;
pub mod event;
pub mod store;

pub use error::{MetaError, MetaResult};
pub use event::MetadataEvent;
pub use store::{MetaConfig, MetadataStore, DEFAULT_MAX_DEPENDENCIES, DEFAULT_METADATA_CONTAINER};
