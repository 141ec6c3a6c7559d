//! Checksummed binary entry codec.
//!
//! Encoded block layout:
//! ```text
//! | varint block_size | meta | varint keylen | varint valuelen | key | value | varint crc32 |
//! ```
//! `block_size` counts everything after itself, trailing checksum
//! included. The checksum covers `header ‖ key ‖ value`, the bytes
//! actually written, i.e. post-compression.

use murmur_common::config::CompressionType;
use murmur_common::error::StorageError;
use murmur_common::types::{Key, Value, BIT_TOMBSTONE};

/// Append a u64 as a LEB128 varint.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a LEB128 varint, returning the value and bytes consumed.
pub(crate) fn decode_varint(buf: &[u8]) -> Result<(u64, usize), StorageError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(StorageError::Truncated);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(StorageError::Truncated)
}

/// Block compression applied to entry keys and values independently.
/// The checksum is always computed over the compressed bytes.
#[derive(Debug, Clone, Copy)]
pub struct Compression {
    kind: CompressionType,
}

impl Compression {
    pub fn new(kind: CompressionType) -> Self {
        Self { kind }
    }

    pub fn disabled() -> Self {
        Self {
            kind: CompressionType::None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.kind != CompressionType::None
    }

    pub fn compress(&self, raw: &[u8]) -> Vec<u8> {
        match self.kind {
            CompressionType::None => raw.to_vec(),
            CompressionType::Lz4 => lz4_flex::compress_prepend_size(raw),
        }
    }

    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        match self.kind {
            CompressionType::None => Ok(data.to_vec()),
            CompressionType::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| StorageError::Decompression(e.to_string())),
        }
    }
}

/// A unit of storage in the log. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub meta: u8,
}

impl Entry {
    pub fn new(key: Key, value: Value, meta: u8) -> Self {
        Self { key, value, meta }
    }

    pub fn put(key: Key, value: Value) -> Self {
        Self::new(key, value, 0)
    }

    pub fn tombstone(key: Key) -> Self {
        Self::new(key, Vec::new(), BIT_TOMBSTONE)
    }

    /// True if the tombstone bit is set.
    pub fn is_deleted(&self) -> bool {
        self.meta & BIT_TOMBSTONE == BIT_TOMBSTONE
    }

    /// `meta ‖ varint(keylen) ‖ varint(valuelen)` over the written
    /// (possibly compressed) lengths.
    fn encode_header(meta: u8, keylen: usize, valuelen: usize) -> Vec<u8> {
        let mut header = vec![meta];
        encode_varint(&mut header, keylen as u64);
        encode_varint(&mut header, valuelen as u64);
        header
    }

    /// Encode this entry into a checksummed block.
    pub fn encode(&self, compression: &Compression) -> Vec<u8> {
        let (key, value) = if compression.is_enabled() {
            (
                compression.compress(&self.key),
                compression.compress(&self.value),
            )
        } else {
            (self.key.clone(), self.value.clone())
        };

        let header = Self::encode_header(self.meta, key.len(), value.len());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&key);
        hasher.update(&value);
        let checksum = hasher.finalize();

        let mut body = header;
        body.extend_from_slice(&key);
        body.extend_from_slice(&value);
        encode_varint(&mut body, u64::from(checksum));

        let mut out = Vec::with_capacity(body.len() + 4);
        encode_varint(&mut out, body.len() as u64);
        out.extend_from_slice(&body);
        out
    }

    /// Decode one block from the front of `buf`. Returns the entry and
    /// the total number of bytes the block occupies, so callers can
    /// advance a scan cursor.
    ///
    /// The checksum is verified against a freshly rebuilt header before
    /// any decompression happens; a mismatch is fatal to this call.
    pub fn decode(buf: &[u8], compression: &Compression) -> Result<(Entry, usize), StorageError> {
        let (block_size, size_len) = decode_varint(buf)?;
        let block_size = block_size as usize;
        let total = size_len + block_size;
        if buf.len() < total {
            return Err(StorageError::Truncated);
        }
        let block = &buf[size_len..total];

        let (meta, meta_len) = decode_varint(block)?;
        let mut cursor = meta_len;
        let (keylen, n) = decode_varint(&block[cursor..])?;
        cursor += n;
        let (valuelen, n) = decode_varint(&block[cursor..])?;
        cursor += n;

        let keylen = keylen as usize;
        let valuelen = valuelen as usize;
        if block.len() < cursor + keylen + valuelen {
            return Err(StorageError::Truncated);
        }
        let key = &block[cursor..cursor + keylen];
        let value = &block[cursor + keylen..cursor + keylen + valuelen];
        let (checksum, _) = decode_varint(&block[cursor + keylen + valuelen..])?;

        let header = Self::encode_header(meta as u8, keylen, valuelen);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(key);
        hasher.update(value);
        if u64::from(hasher.finalize()) != checksum {
            return Err(StorageError::ChecksumMismatch);
        }

        let (key, value) = if compression.is_enabled() {
            (compression.decompress(key)?, compression.decompress(value)?)
        } else {
            (key.to_vec(), value.to_vec())
        };

        Ok((
            Entry {
                key,
                value,
                meta: meta as u8,
            },
            total,
        ))
    }
}
