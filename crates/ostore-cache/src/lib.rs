//! Query-result cache for ostore.
//!
//! [`IndexerCache`] maps a query fingerprint to the ordered list of object
//! IDs an index lookup returned, per object type. Each per-type record is
//! tagged with the type's version when it was built; once the version store
//! advances past the tag, reads miss until the record is rebuilt.
//!
//! [`HardPruneCacheCleaner`] runs in a background thread and cuts the cache
//! by a fixed factor whenever it grows beyond its configured limits,
//! evicting the least-read entries first.

pub mod cache;
pub mod cleaner;
pub mod error;
pub mod fingerprint;

pub use cache::{CacheEntryRef, CacheTotals, IndexerCache};
pub use cleaner::{
    CleanerConfig, HardPruneCacheCleaner, DEFAULT_CLEAN_FREQUENCY, DEFAULT_MAX_OBJECTS,
    DEFAULT_MAX_QUERIES, DEFAULT_REDUCTION_FACTOR,
};
pub use error::{CacheError, CacheResult};
pub use fingerprint::fingerprint;
