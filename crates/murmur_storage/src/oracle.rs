//! Timestamp oracle: snapshot timestamps, commit timestamps, and
//! first-committer-wins conflict detection.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use murmur_common::error::TxnError;
use murmur_common::types::{Key, Timestamp, TxnId, MAX_TS};

struct OracleInner {
    /// Next commit timestamp to hand out. Starts at 1; 0 is the empty
    /// snapshot before any commit.
    next_ts: Timestamp,
    /// Latest commit timestamp per logical key.
    commits: HashMap<Key, Timestamp>,
}

pub struct Oracle {
    inner: Mutex<OracleInner>,
    /// Serializes whole commits: conflict check, timestamp assignment,
    /// and table apply happen under this lock so no commit can slip in
    /// between another's validation and its writes landing.
    write_lock: Mutex<()>,
}

impl Default for Oracle {
    fn default() -> Self {
        Self::new()
    }
}

impl Oracle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(OracleInner {
                next_ts: 1,
                commits: HashMap::new(),
            }),
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot timestamp for a new transaction: everything committed
    /// so far is visible, nothing in flight is.
    pub fn read_ts(&self) -> Timestamp {
        self.inner.lock().next_ts - 1
    }

    /// Must be held across conflict check and table apply.
    pub fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Validate a transaction's read set and assign its commit
    /// timestamp. Fails with `Conflict` if any key it read was
    /// committed by someone else after its snapshot was taken.
    pub fn commit_request(
        &self,
        txn_id: TxnId,
        read_ts: Timestamp,
        reads: &HashSet<Key>,
        write_keys: impl Iterator<Item = Key>,
    ) -> Result<Timestamp, TxnError> {
        let mut inner = self.inner.lock();
        for key in reads {
            if let Some(&committed) = inner.commits.get(key) {
                if committed > read_ts {
                    debug!(txn_id, read_ts, committed, "read set invalidated");
                    return Err(TxnError::Conflict(txn_id));
                }
            }
        }
        if inner.next_ts == MAX_TS {
            return Err(TxnError::TimestampExhausted);
        }
        let commit_ts = inner.next_ts;
        inner.next_ts += 1;
        for key in write_keys {
            inner.commits.insert(key, commit_ts);
        }
        debug!(txn_id, commit_ts, "commit granted");
        Ok(commit_ts)
    }
}
