//! Versioned key encoding.
//!
//! Every committed key carries an 8-byte big-endian suffix of
//! `MAX_TS - ts`. Inverting the timestamp makes newer versions of the
//! same logical key sort *before* older ones, so a greater-or-equal
//! index seek at `key ‖ (MAX_TS - read_ts)` lands on the newest version
//! visible at `read_ts`.

use murmur_common::types::{Key, Timestamp, MAX_TS};

pub const TS_SUFFIX_LEN: usize = 8;

/// Append the inverted-timestamp suffix to a logical key.
pub fn encode_key_with_ts(key: &[u8], ts: Timestamp) -> Key {
    let mut out = Vec::with_capacity(key.len() + TS_SUFFIX_LEN);
    out.extend_from_slice(key);
    out.extend_from_slice(&(MAX_TS - ts).to_be_bytes());
    out
}

/// Split a versioned key back into its logical key and timestamp.
/// Returns `None` if the key is too short to carry a suffix.
pub fn decode_key_with_ts(key: &[u8]) -> Option<(&[u8], Timestamp)> {
    if key.len() < TS_SUFFIX_LEN {
        return None;
    }
    let split = key.len() - TS_SUFFIX_LEN;
    let mut suffix = [0u8; TS_SUFFIX_LEN];
    suffix.copy_from_slice(&key[split..]);
    Some((&key[..split], MAX_TS - u64::from_be_bytes(suffix)))
}
