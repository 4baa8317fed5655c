//! Byte encodings shared by every persisted structure.
//!
//! Integers (IDs, versions, counters) are fixed 4-byte little-endian; strings
//! are UTF-8; type keys are the UTF-8 bytes of the `namespace.name` form.

use crate::error::TypeError;
use crate::name::ObjectTypeName;

/// Encode a `u32` as 4 little-endian bytes.
pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Decode a 4-byte little-endian `u32`.
pub fn decode_u32(bytes: &[u8]) -> Result<u32, TypeError> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
        expected: 4,
        actual: bytes.len(),
    })?;
    Ok(u32::from_le_bytes(arr))
}

pub fn encode_str(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

pub fn decode_str(bytes: &[u8]) -> Result<String, TypeError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| TypeError::InvalidUtf8(e.to_string()))
}

/// Storage key for a per-type record.
pub fn type_key(name: &ObjectTypeName) -> Vec<u8> {
    encode_str(&name.full_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_is_little_endian() {
        assert_eq!(encode_u32(1), [1, 0, 0, 0]);
        assert_eq!(encode_u32(0x0102_0304), [4, 3, 2, 1]);
        assert_eq!(decode_u32(&[4, 3, 2, 1]).unwrap(), 0x0102_0304);
    }

    #[test]
    fn decode_u32_rejects_wrong_length() {
        assert_eq!(
            decode_u32(&[1, 2, 3]),
            Err(TypeError::InvalidLength {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn type_key_is_full_name_utf8() {
        let name = ObjectTypeName::new("Shop", "Order").unwrap();
        assert_eq!(type_key(&name), b"Shop.Order".to_vec());
    }

    #[test]
    fn decode_str_rejects_invalid_utf8() {
        assert!(decode_str(&[0xff, 0xfe]).is_err());
        assert_eq!(decode_str(b"ok").unwrap(), "ok");
    }
}
