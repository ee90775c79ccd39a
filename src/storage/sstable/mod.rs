//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Blocks (variable)                                  │
//! │   [Codec: u8][Body][CRC32: u32]                         │
//! │   Body (after decompression) repeats:                   │
//! │   [KeyLen: u32][Seq: u64][Kind: u8][ValLen: u32][Key][Value] │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block                                             │
//! │   [Count: u32] then per block:                          │
//! │   [KeyLen: u32][LastKey][Offset: u64][Size: u32]        │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filter Block (bloom, may be empty)                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Summary Block                                           │
//! │   Count, Tombstones, MinSeq, MaxSeq, MinKey, MaxKey     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (64 bytes)                                       │
//! │   IndexOff/Len, FilterOff/Len, SummaryOff/Len (u64 x6)  │
//! │   MetaCRC: u32 | Version: u32 | Magic: "STRATAST"       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! MetaCRC covers the index, filter and summary blocks. Every data block
//! carries its own CRC, checked when the block is read.

mod block;
mod bloom;
mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::config::{Compression, Config};
use crate::error::{Result, StrataError};

pub use block::{Block, BlockBuilder};
pub use bloom::BloomFilter;
pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a StrataDB SSTable file
pub(crate) const MAGIC: &[u8; 8] = b"STRATAST";

/// Current SSTable format version
pub(crate) const VERSION: u32 = 1;

/// Footer size: six u64 offsets/lengths + MetaCRC (4) + Version (4) + Magic (8)
pub(crate) const FOOTER_SIZE: u64 = 64;

/// Record kind tags inside a data block
pub(crate) const KIND_VALUE: u8 = 1;
pub(crate) const KIND_TOMBSTONE: u8 = 0;

// =============================================================================
// File Naming
// =============================================================================

/// "sstable_000042.sst"
pub fn sstable_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("sstable_{:06}.sst", id))
}

/// "sstable_000042.sst" → Some(42)
pub fn parse_sstable_id(path: &Path) -> Option<u64> {
    if path.extension()? != "sst" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("sstable_")?.parse().ok()
}

// =============================================================================
// Table Options
// =============================================================================

/// Knobs the builder needs, extracted from `Config`
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    pub block_size: usize,
    pub bloom_bits_per_key: usize,
    pub compression: Compression,
}

impl TableOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            block_size: config.block_size,
            bloom_bits_per_key: config.bloom_bits_per_key,
            compression: config.compression,
        }
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Summary of a finished SSTable, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// File id (`sstable_{id}.sst`)
    pub id: u64,
    /// File size in bytes
    pub file_size: u64,
    /// Number of records, tombstones included
    pub entry_count: u64,
    pub tombstone_count: u64,
    /// Smallest key (for range filtering)
    pub min_key: Vec<u8>,
    /// Largest key (for range filtering)
    pub max_key: Vec<u8>,
    pub min_seq: u64,
    pub max_seq: u64,
}

impl TableMeta {
    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// Whether [min, max] intersects this table's key range
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        self.min_key.as_slice() <= max && min <= self.max_key.as_slice()
    }
}

// =============================================================================
// Footer and Summary Encoding
// =============================================================================

/// Location of a block inside the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub offset: u64,
    pub len: u64,
}

impl BlockHandle {
    /// Offset just past the block, `None` if it would overflow
    pub(crate) fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footer {
    pub index: BlockHandle,
    pub filter: BlockHandle,
    pub summary: BlockHandle,
    pub meta_crc: u32,
}

impl Footer {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE as usize);
        for handle in [self.index, self.filter, self.summary] {
            buf.put_u64_le(handle.offset);
            buf.put_u64_le(handle.len);
        }
        buf.put_u32_le(self.meta_crc);
        buf.put_u32_le(VERSION);
        buf.put_slice(MAGIC);
        buf
    }

    pub(crate) fn decode(mut data: &[u8], path: &Path) -> Result<Self> {
        if data.len() != FOOTER_SIZE as usize {
            return Err(StrataError::CorruptTable(format!(
                "{}: footer is {} bytes, expected {}",
                path.display(),
                data.len(),
                FOOTER_SIZE
            )));
        }
        if &data[56..64] != MAGIC {
            return Err(StrataError::CorruptTable(format!(
                "{}: bad magic {:?}",
                path.display(),
                &data[56..64]
            )));
        }

        let mut handles = [BlockHandle { offset: 0, len: 0 }; 3];
        for handle in handles.iter_mut() {
            handle.offset = data.get_u64_le();
            handle.len = data.get_u64_le();
        }
        let meta_crc = data.get_u32_le();
        let version = data.get_u32_le();
        if version != VERSION {
            return Err(StrataError::CorruptTable(format!(
                "{}: unsupported SSTable version {}",
                path.display(),
                version
            )));
        }

        Ok(Self {
            index: handles[0],
            filter: handles[1],
            summary: handles[2],
            meta_crc,
        })
    }
}

/// Aggregate facts about a table's records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Summary {
    pub entry_count: u64,
    pub tombstone_count: u64,
    pub min_seq: u64,
    pub max_seq: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

impl Summary {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(40 + self.min_key.len() + self.max_key.len());
        buf.put_u64_le(self.entry_count);
        buf.put_u64_le(self.tombstone_count);
        buf.put_u64_le(self.min_seq);
        buf.put_u64_le(self.max_seq);
        buf.put_u32_le(self.min_key.len() as u32);
        buf.put_slice(&self.min_key);
        buf.put_u32_le(self.max_key.len() as u32);
        buf.put_slice(&self.max_key);
        buf
    }

    pub(crate) fn decode(mut data: &[u8], path: &Path) -> Result<Self> {
        let corrupt = || StrataError::CorruptTable(format!("{}: malformed summary", path.display()));

        if data.remaining() < 36 {
            return Err(corrupt());
        }
        let entry_count = data.get_u64_le();
        let tombstone_count = data.get_u64_le();
        let min_seq = data.get_u64_le();
        let max_seq = data.get_u64_le();
        let min_key = read_len_prefixed(&mut data).ok_or_else(corrupt)?;
        let max_key = read_len_prefixed(&mut data).ok_or_else(corrupt)?;

        Ok(Self {
            entry_count,
            tombstone_count,
            min_seq,
            max_seq,
            min_key,
            max_key,
        })
    }
}

/// Read `[len u32][bytes]`, or `None` if the buffer is too short
pub(crate) fn read_len_prefixed(data: &mut &[u8]) -> Option<Vec<u8>> {
    if data.remaining() < 4 {
        return None;
    }
    let len = data.get_u32_le() as usize;
    if data.remaining() < len {
        return None;
    }
    let bytes = data[..len].to_vec();
    data.advance(len);
    Some(bytes)
}
