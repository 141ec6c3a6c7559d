//! Snapshot-isolation transactions with serializable read-set
//! validation at commit time.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use murmur_common::error::{MurmurResult, TxnError};
use murmur_common::types::{Key, Timestamp, TxnId, Value};

use crate::codec::Entry;
use crate::store::Store;
use crate::version::{decode_key_with_ts, encode_key_with_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Pending,
    Committed,
    Aborted,
    /// Committed with nothing to write; no timestamp was consumed.
    Noop,
}

/// A transaction over one store. Writes are buffered locally and only
/// become visible when `commit` succeeds; reads always come from the
/// snapshot at `read_ts`, or from this transaction's own buffer.
pub struct Transaction {
    store: Arc<Store>,
    txn_id: TxnId,
    read_ts: Timestamp,
    commit_ts: Option<Timestamp>,
    reads: HashSet<Key>,
    /// Pending writes in first-write order. One slot per logical key,
    /// later writes to the same key replace the slot in place.
    writes: Vec<Entry>,
    /// Read results accumulated for the caller, in key order.
    returning: BTreeMap<Key, Option<Value>>,
    status: TxnStatus,
}

impl Transaction {
    pub(crate) fn new(store: Arc<Store>, read_ts: Timestamp) -> Self {
        let txn_id: TxnId = rand::random();
        debug!(txn_id, read_ts, "begin");
        Self {
            store,
            txn_id,
            read_ts,
            commit_ts: None,
            reads: HashSet::new(),
            writes: Vec::new(),
            returning: BTreeMap::new(),
            status: TxnStatus::Pending,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Read results gathered so far, in key order.
    pub fn returning(&self) -> &BTreeMap<Key, Option<Value>> {
        &self.returning
    }

    /// Read `key` at this transaction's snapshot. Own pending writes
    /// win over the snapshot; a deleted or absent key is `None`.
    pub fn read(&mut self, key: &[u8]) -> MurmurResult<Option<Value>> {
        if let Some(pending) = self.writes.iter().find(|e| e.key == key) {
            let value = if pending.is_deleted() {
                None
            } else {
                Some(pending.value.clone())
            };
            self.returning.insert(key.to_vec(), value.clone());
            return Ok(value);
        }

        self.reads.insert(key.to_vec());
        let seek = encode_key_with_ts(key, self.read_ts);
        let value = match self.store.read(&seek)? {
            Some(entry) => match decode_key_with_ts(&entry.key) {
                // The seek can land on the next logical key entirely.
                Some((logical, _)) if logical == key && !entry.is_deleted() => Some(entry.value),
                _ => None,
            },
            None => None,
        };
        self.returning.insert(key.to_vec(), value.clone());
        Ok(value)
    }

    pub fn write(&mut self, key: &[u8], value: Vec<u8>) {
        self.upsert(Entry::put(key.to_vec(), value));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.upsert(Entry::tombstone(key.to_vec()));
    }

    fn upsert(&mut self, entry: Entry) {
        match self.writes.iter_mut().find(|e| e.key == entry.key) {
            Some(slot) => *slot = entry,
            None => self.writes.push(entry),
        }
    }

    /// Validate the read set, stamp every buffered write with the
    /// commit timestamp, and apply them as one batch. On conflict the
    /// transaction is aborted and nothing is written.
    pub fn commit(&mut self) -> MurmurResult<()> {
        if self.status != TxnStatus::Pending {
            return Err(TxnError::AlreadyFinished(self.txn_id).into());
        }
        if self.writes.is_empty() {
            self.status = TxnStatus::Noop;
            return Ok(());
        }

        let oracle = self.store.oracle();
        let _guard = oracle.write_lock();

        let commit_ts = match oracle.commit_request(
            self.txn_id,
            self.read_ts,
            &self.reads,
            self.writes.iter().map(|e| e.key.clone()),
        ) {
            Ok(ts) => ts,
            Err(e) => {
                self.status = TxnStatus::Aborted;
                debug!(txn_id = self.txn_id, "aborted");
                return Err(e.into());
            }
        };

        let batch: Vec<Entry> = self
            .writes
            .iter()
            .map(|e| Entry::new(encode_key_with_ts(&e.key, commit_ts), e.value.clone(), e.meta))
            .collect();
        self.store.apply(&batch)?;

        self.commit_ts = Some(commit_ts);
        self.status = TxnStatus::Committed;
        debug!(txn_id = self.txn_id, commit_ts, "committed");
        Ok(())
    }
}
