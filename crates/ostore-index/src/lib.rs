//! Secondary indexes for ostore.
//!
//! An object type declares typed indexes in its schema; each stored object
//! carries values for some of them. [`ObjectIndexer`] validates those
//! values, forwards them to an [`IndexProvider`], and answers conjunctive
//! constraint [`Query`]s, consulting the [`IndexerCache`](ostore_cache::IndexerCache)
//! first when one is attached.
//!
//! [`ContainerIndexProvider`] keeps index values in `Index/<type>`
//! containers and evaluates queries by scanning them.

pub mod error;
pub mod indexer;
pub mod provider;
pub mod query;

pub use error::{IndexError, IndexResult};
pub use indexer::ObjectIndexer;
pub use provider::{ContainerIndexProvider, IndexProvider, INDEX_ROOT};
pub use query::{Constraint, Operator, Query, RawConstraint};
