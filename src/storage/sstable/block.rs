//! Data block encoding
//!
//! A block is a run of records in key order, compressed as a unit and
//! protected by a CRC over the on-disk bytes.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::config::Compression;
use crate::error::{Result, StrataError};
use crate::record::{Entry, Record};
use super::{KIND_TOMBSTONE, KIND_VALUE};

/// Per-record framing: KeyLen (4) + Seq (8) + Kind (1) + ValLen (4)
const RECORD_HEADER: usize = 17;

/// Accumulates records for one data block
pub struct BlockBuilder {
    buf: BytesMut,
    count: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            count: 0,
            last_key: Vec::new(),
        }
    }

    pub fn add(&mut self, key: &[u8], record: &Record) {
        self.buf.put_u32_le(key.len() as u32);
        self.buf.put_u64_le(record.seq);
        match &record.entry {
            Entry::Value(value) => {
                self.buf.put_u8(KIND_VALUE);
                self.buf.put_u32_le(value.len() as u32);
                self.buf.put_slice(key);
                self.buf.put_slice(value);
            }
            Entry::Tombstone => {
                self.buf.put_u8(KIND_TOMBSTONE);
                self.buf.put_u32_le(0);
                self.buf.put_slice(key);
            }
        }
        self.count += 1;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
    }

    /// Uncompressed bytes accumulated so far
    pub fn estimated_size(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Produce the on-disk bytes and reset the builder
    pub fn finish(&mut self, compression: Compression) -> Vec<u8> {
        let raw = self.buf.split().freeze();
        self.count = 0;

        let body = match compression {
            Compression::None => raw.to_vec(),
            Compression::Lz4 => lz4_flex::compress_prepend_size(&raw),
        };

        let mut out = Vec::with_capacity(body.len() + 5);
        out.put_u8(compression as u8);
        out.put_slice(&body);
        let crc = crc32fast::hash(&out);
        out.put_u32_le(crc);
        out
    }
}

/// A decoded data block
#[derive(Debug, Clone, Default)]
pub struct Block {
    entries: Vec<(Vec<u8>, Record)>,
}

impl Block {
    /// Verify and decode the on-disk bytes of a block
    pub fn decode(data: &[u8], path: &Path, offset: u64) -> Result<Self> {
        let corrupt = |what: &str| {
            StrataError::CorruptTable(format!(
                "{}: block at offset {}: {}",
                path.display(),
                offset,
                what
            ))
        };

        if data.len() < 5 {
            return Err(corrupt("too short"));
        }
        let (content, crc_bytes) = data.split_at(data.len() - 4);
        let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(content) != stored_crc {
            return Err(corrupt("checksum mismatch"));
        }

        let codec = Compression::from_u8(content[0]).ok_or_else(|| corrupt("unknown codec"))?;
        let raw = match codec {
            Compression::None => content[1..].to_vec(),
            Compression::Lz4 => lz4_flex::decompress_size_prepended(&content[1..])
                .map_err(|e| corrupt(&format!("lz4: {}", e)))?,
        };

        let mut entries = Vec::new();
        let mut buf = raw.as_slice();
        while buf.has_remaining() {
            if buf.remaining() < RECORD_HEADER {
                return Err(corrupt("truncated record header"));
            }
            let key_len = buf.get_u32_le() as usize;
            let seq = buf.get_u64_le();
            let kind = buf.get_u8();
            let val_len = buf.get_u32_le() as usize;
            if buf.remaining() < key_len + val_len {
                return Err(corrupt("truncated record"));
            }
            let key = buf[..key_len].to_vec();
            buf.advance(key_len);

            let record = match kind {
                KIND_VALUE => {
                    let value = buf[..val_len].to_vec();
                    buf.advance(val_len);
                    Record::value(seq, value)
                }
                KIND_TOMBSTONE => Record::tombstone(seq),
                other => return Err(corrupt(&format!("unknown record kind {}", other))),
            };
            entries.push((key, record));
        }

        Ok(Self { entries })
    }

    /// Binary search for an exact key
    pub fn get(&self, key: &[u8]) -> Option<&Record> {
        self.entries
            .binary_search_by(|(k, _)| k.as_slice().cmp(key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Index of the first entry with key >= `key`
    pub fn seek(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|(k, _)| k.as_slice() < key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<(Vec<u8>, Record)> {
        self.entries
    }
}
