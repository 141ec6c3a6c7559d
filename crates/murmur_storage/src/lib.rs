//! Log-structured in-memory storage engine with snapshot-isolation
//! transactions.
//!
//! Write path:
//! ```text
//! Store::begin() → Transaction::write / read
//!   → Transaction::commit()
//!     → Oracle::commit_request  [SSI read-set validation, ts assignment]
//!     → version-suffix every pending key with the commit ts
//!     → Memtable::put batch     [append to arena + AVL index]
//! ```
//!
//! Reads seek `key ‖ (MAX_TS - read_ts)` through the index's
//! greater-or-equal search; the inverted suffix makes the newest
//! visible version the smallest key at or after the seek point.

pub mod codec;
pub mod index;
pub mod memtable;
pub mod oracle;
pub mod store;
pub mod txn;
pub mod version;

pub use codec::{Compression, Entry};
pub use memtable::Memtable;
pub use oracle::Oracle;
pub use store::Store;
pub use txn::{Transaction, TxnStatus};
