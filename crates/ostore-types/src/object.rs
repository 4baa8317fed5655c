use serde::{Deserialize, Serialize};

use crate::index::{IndexValue, NamedIndexValue};

/// Generate a fresh random 128-bit unique key (UUID v4 bytes).
pub fn new_unique_key() -> Vec<u8> {
    uuid::Uuid::new_v4().as_bytes().to_vec()
}

/// A persistent object as submitted to, or returned from, the service.
///
/// `id` is assigned by the ID store when absent and is immutable once
/// assigned. `unique_key` is an optional secondary key that maps to exactly
/// one ID within an object type (last writer wins).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: Option<u32>,
    pub unique_key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub indexes: Vec<NamedIndexValue>,
}

impl ObjectRecord {
    /// A new record with no ID, no key and no index values.
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, value: IndexValue) -> Self {
        self.indexes.push(NamedIndexValue::new(name, value));
        self
    }

    /// Hex form of the unique key, if any.
    pub fn unique_key_hex(&self) -> Option<String> {
        self.unique_key.as_ref().map(hex::encode)
    }
}

/// An object as read back from the store: ID, optional key, raw value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: u32,
    pub unique_key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_keys_are_128_bit_and_distinct() {
        let a = new_unique_key();
        let b = new_unique_key();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn builder_sets_fields() {
        let rec = ObjectRecord::new(b"payload".to_vec())
            .with_id(7)
            .with_unique_key(b"k1".to_vec())
            .with_index("Idx0", IndexValue::Integer(2));
        assert_eq!(rec.id, Some(7));
        assert_eq!(rec.unique_key_hex().as_deref(), Some("6b31"));
        assert_eq!(rec.indexes.len(), 1);
        assert_eq!(rec.indexes[0].name, "Idx0");
    }
}
