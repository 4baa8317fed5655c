//! Query fingerprints.
//!
//! A fingerprint is the first four bytes (little-endian) of a BLAKE3 hash
//! over the length-prefixed query parameters. Length prefixes keep
//! `["ab", "c"]` and `["a", "bc"]` apart. Collisions in the 32-bit space
//! share a cache slot.

/// Fingerprint an ordered list of query parameters.
pub fn fingerprint<S: AsRef<str>>(params: &[S]) -> u32 {
    let mut hasher = blake3::Hasher::new();
    for param in params {
        let bytes = param.as_ref().as_bytes();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    let hash = hasher.finalize();
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_queries_hash_identically() {
        let a = fingerprint(&["Shop.Order", "Idx0=2"]);
        let b = fingerprint(&["Shop.Order".to_string(), "Idx0=2".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            fingerprint(&["Shop.Order", "a", "b"]),
            fingerprint(&["Shop.Order", "b", "a"])
        );
    }

    #[test]
    fn parameter_boundaries_matter() {
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }
}
