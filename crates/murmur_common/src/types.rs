use std::time::{SystemTime, UNIX_EPOCH};

/// Raw storage key. Logical keys are arbitrary bytes; the storage layer
/// appends a version suffix before they reach the index.
pub type Key = Vec<u8>;

/// Raw storage value.
pub type Value = Vec<u8>;

/// Commit / read timestamp issued by the oracle.
pub type Timestamp = u64;

/// Transaction identifier.
pub type TxnId = u64;

/// Largest representable timestamp. Version suffixes are encoded as
/// `MAX_TS - ts` so newer versions sort first.
pub const MAX_TS: Timestamp = u64::MAX;

/// Entry meta bit 0: the entry is a tombstone.
pub const BIT_TOMBSTONE: u8 = 1 << 0;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as u64
}
