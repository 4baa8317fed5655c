//! Packed value framing.
//!
//! ```text
//! without key:  [value ...]
//! with key:     [0x7C 0x7C][key_len u32 LE][key ...][value ...]
//! ```
//!
//! The format is not self-describing: a raw value that happens to begin with
//! the marker and a length that fits inside it decodes as framed. Writers
//! that need to avoid this must always supply a key.

/// Leading bytes of a framed value.
pub const MARKER: [u8; 2] = [0x7C, 0x7C];

const HEADER_LEN: usize = MARKER.len() + 4;

/// A decoded stored value, borrowing from the packed bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unpacked<'a> {
    pub secondary_key: Option<&'a [u8]>,
    pub value: &'a [u8],
}

/// Frame `value` behind `secondary_key`. An absent or empty key stores the
/// value raw.
pub fn pack(secondary_key: Option<&[u8]>, value: &[u8]) -> Vec<u8> {
    match secondary_key {
        Some(key) if !key.is_empty() => {
            let mut out = Vec::with_capacity(HEADER_LEN + key.len() + value.len());
            out.extend_from_slice(&MARKER);
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(value);
            out
        }
        _ => value.to_vec(),
    }
}

/// Split stored bytes into secondary key and payload.
pub fn unpack(bytes: &[u8]) -> Unpacked<'_> {
    if bytes.len() >= HEADER_LEN && bytes[..2] == MARKER {
        let len = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        if len > 0 && len <= bytes.len() - HEADER_LEN {
            let (key, value) = bytes[HEADER_LEN..].split_at(len);
            return Unpacked {
                secondary_key: Some(key),
                value,
            };
        }
    }
    Unpacked {
        secondary_key: None,
        value: bytes,
    }
}
