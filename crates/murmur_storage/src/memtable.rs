//! Append-only in-memory table.
//!
//! Entries are encoded into a flat arena in arrival order; the AVL
//! index maps versioned keys to arena offsets. Nothing is ever
//! rewritten in place, an overwrite is just a newer entry under a new
//! versioned key.

use tracing::trace;

use murmur_common::error::StorageError;

use crate::codec::{Compression, Entry};
use crate::index::{Index, IndexEntry};

pub struct Memtable {
    max_size: usize,
    compression: Compression,
    arena: Vec<u8>,
    entries_count: usize,
    index: Index,
}

impl Memtable {
    pub fn new(max_size: usize, compression: Compression) -> Self {
        Self {
            max_size,
            compression,
            arena: Vec::new(),
            entries_count: 0,
            index: Index::new(),
        }
    }

    /// Encode `entry` and append it. Fails without side effects if the
    /// encoded block would push the arena past its capacity.
    pub fn put(&mut self, entry: &Entry) -> Result<(), StorageError> {
        let encoded = entry.encode(&self.compression);
        if self.arena.len() + encoded.len() > self.max_size {
            return Err(StorageError::TableOverflow {
                size: encoded.len(),
                max: self.max_size,
            });
        }
        let offset = self.arena.len();
        self.arena.extend_from_slice(&encoded);
        self.index.insert(IndexEntry {
            key: entry.key.clone(),
            offset,
        });
        self.entries_count += 1;
        trace!(offset, size = encoded.len(), "appended entry");
        Ok(())
    }

    /// Exact lookup of a versioned key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, StorageError> {
        match self.index.get(key) {
            Some(ie) => Ok(Some(self.decode_at(ie.offset)?)),
            None => Ok(None),
        }
    }

    /// Smallest entry whose key is at or after `key`.
    pub fn seek(&self, key: &[u8]) -> Result<Option<Entry>, StorageError> {
        match self.index.search(key, true) {
            Some(ie) => Ok(Some(self.decode_at(ie.offset)?)),
            None => Ok(None),
        }
    }

    fn decode_at(&self, offset: usize) -> Result<Entry, StorageError> {
        let (entry, _) = Entry::decode(&self.arena[offset..], &self.compression)?;
        Ok(entry)
    }

    /// Iterate every entry in arena (arrival) order, superseded
    /// versions included.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            table: self,
            offset: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.arena.len()
    }

    pub fn entries_count(&self) -> usize {
        self.entries_count
    }
}

pub struct Scan<'a> {
    table: &'a Memtable,
    offset: usize,
}

impl Iterator for Scan<'_> {
    type Item = Result<Entry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.table.arena.len() {
            return None;
        }
        match Entry::decode(&self.table.arena[self.offset..], &self.table.compression) {
            Ok((entry, read)) => {
                self.offset += read;
                Some(Ok(entry))
            }
            Err(e) => {
                // Poison the cursor so a corrupt block surfaces once.
                self.offset = self.table.arena.len();
                Some(Err(e))
            }
        }
    }
}
