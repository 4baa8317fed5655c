//! Foundation types for ostore.
//!
//! This crate provides the naming, record, schema, and notification types
//! shared by every other ostore crate.
//!
//! # Key Types
//!
//! - [`ObjectTypeName`] -- `namespace.name` identity of an object type
//! - [`ObjectRecord`] -- a persistent object: ID, optional unique key, value, index values
//! - [`IndexValue`] / [`IndexDefinition`] -- typed secondary index terms
//! - [`ObjectTypeSchema`] -- per-type index definitions and dependency list
//! - [`Notifier`] -- post-commit change notification fan-out
//! - [`DependencyResolver`] -- lookup of the types that depend on a given type

pub mod deps;
pub mod error;
pub mod index;
pub mod name;
pub mod notify;
pub mod object;
pub mod schema;
pub mod serializer;

pub use deps::{DependencyResolver, NoDependencies};
pub use error::TypeError;
pub use index::{IndexDefinition, IndexKind, IndexValue, NamedIndexValue};
pub use name::{validate_name, ObjectTypeName};
pub use notify::{Listener, Notifier};
pub use object::{new_unique_key, ObjectRecord, StoredEntry};
pub use schema::ObjectTypeSchema;
pub use serializer::{decode_str, decode_u32, encode_str, encode_u32, type_key};
