//! Object payload storage for ostore.
//!
//! Every object type owns two containers:
//!
//! - `Store/<type>`: 4-byte little-endian ID -> packed value
//! - `SecondaryStore/<type>`: secondary key -> 4-byte little-endian ID
//!
//! A packed value embeds the object's secondary key in front of the payload
//! (see [`codec`]), so removing by ID can find and delete the secondary
//! mapping without a reverse index.
//!
//! Containers are opened on first use and, with auto-close enabled, closed
//! again by a background sweep once idle. [`ObjectIdStore`] hands out the
//! per-type integer IDs.

pub mod codec;
pub mod error;
pub mod ids;
pub mod store;

pub use codec::{pack, unpack, Unpacked, MARKER};
pub use error::{StoreError, StoreResult};
pub use ids::{ObjectIdStore, DEFAULT_ID_CONTAINER};
pub use store::{ObjectStore, StoreConfig, SECONDARY_STORE_ROOT, STORE_ROOT};
