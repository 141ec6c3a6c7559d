//! Store: the memtable plus the oracle, behind a transactional API.

use std::sync::Arc;

use parking_lot::Mutex;

use murmur_common::config::StorageConfig;
use murmur_common::error::{MurmurResult, StorageError};
use murmur_common::types::Value;

use crate::codec::{Compression, Entry};
use crate::memtable::Memtable;
use crate::oracle::Oracle;
use crate::txn::Transaction;

pub struct Store {
    oracle: Oracle,
    memtable: Mutex<Memtable>,
}

impl Store {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            oracle: Oracle::new(),
            memtable: Mutex::new(Memtable::new(
                config.max_table_size,
                Compression::new(config.compression),
            )),
        }
    }

    /// Open a transaction at the current snapshot.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        Transaction::new(Arc::clone(self), self.oracle.read_ts())
    }

    /// Run `f` inside a transaction and commit exactly once on
    /// success. If `f` fails the transaction is abandoned uncommitted.
    pub fn with_txn<T>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut Transaction) -> MurmurResult<T>,
    ) -> MurmurResult<T> {
        let mut txn = self.begin();
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }

    pub fn put(self: &Arc<Self>, key: &[u8], value: Value) -> MurmurResult<()> {
        self.with_txn(|txn| {
            txn.write(key, value);
            Ok(())
        })
    }

    pub fn get(self: &Arc<Self>, key: &[u8]) -> MurmurResult<Option<Value>> {
        self.with_txn(|txn| txn.read(key))
    }

    pub fn delete(self: &Arc<Self>, key: &[u8]) -> MurmurResult<()> {
        self.with_txn(|txn| {
            txn.delete(key);
            Ok(())
        })
    }

    pub(crate) fn read(&self, seek: &[u8]) -> Result<Option<Entry>, StorageError> {
        self.memtable.lock().seek(seek)
    }

    /// Append a committed batch. Callers hold the oracle write lock,
    /// so the batch lands atomically with respect to other commits.
    pub(crate) fn apply(&self, batch: &[Entry]) -> Result<(), StorageError> {
        let mut memtable = self.memtable.lock();
        for entry in batch {
            memtable.put(entry)?;
        }
        Ok(())
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    pub fn size(&self) -> usize {
        self.memtable.lock().size()
    }

    pub fn entries_count(&self) -> usize {
        self.memtable.lock().entries_count()
    }
}
