//! SSTable Reader
//!
//! Opens SSTable files and serves point lookups through the sparse index and
//! bloom filter kept in memory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Buf;

use crate::error::{Result, StrataError};
use crate::record::Record;

use super::iterator::SSTableIterator;
use super::{read_len_prefixed, Block, BlockHandle, BloomFilter, Footer, Summary, TableMeta, FOOTER_SIZE};

/// Reader for SSTable files
///
/// Reads use positional I/O on a shared handle, so lookups need no lock and
/// the reader can be shared behind an `Arc`. Once a compaction supersedes
/// the table it is marked obsolete, and the file is deleted when the last
/// reference is dropped.
pub struct SSTableReader {
    id: u64,
    path: PathBuf,
    file: File,
    file_size: u64,
    /// Sparse index: last key of each block → block location
    index: Vec<(Vec<u8>, BlockHandle)>,
    filter: Option<BloomFilter>,
    summary: Summary,
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Validates the footer and the checksum over index, filter and summary,
    /// then loads the index and filter into memory.
    pub fn open(path: &Path, id: u64) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE {
            return Err(StrataError::CorruptTable(format!(
                "{}: file too small ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let footer_bytes = read_at(&file, file_size - FOOTER_SIZE, FOOTER_SIZE as usize)?;
        let footer = Footer::decode(&footer_bytes, path)?;

        // Index, filter and summary must tile the bytes before the footer
        let meta_start = footer.index.offset;
        let meta_end = file_size - FOOTER_SIZE;
        let contiguous = footer.index.end() == Some(footer.filter.offset)
            && footer.filter.end() == Some(footer.summary.offset)
            && footer.summary.end() == Some(meta_end);
        if !contiguous {
            return Err(StrataError::CorruptTable(format!(
                "{}: inconsistent footer offsets",
                path.display()
            )));
        }

        let meta = read_at(&file, meta_start, (meta_end - meta_start) as usize)?;
        if crc32fast::hash(&meta) != footer.meta_crc {
            return Err(StrataError::CorruptTable(format!(
                "{}: metadata checksum mismatch",
                path.display()
            )));
        }

        let index_len = footer.index.len as usize;
        let filter_len = footer.filter.len as usize;
        let index = decode_index(&meta[..index_len], path, meta_start)?;
        let filter = if filter_len == 0 {
            None
        } else {
            Some(
                BloomFilter::decode(&meta[index_len..index_len + filter_len]).ok_or_else(|| {
                    StrataError::CorruptTable(format!("{}: malformed bloom filter", path.display()))
                })?,
            )
        };
        let summary = Summary::decode(&meta[index_len + filter_len..], path)?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            file_size,
            index,
            filter,
            summary,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Point lookup
    ///
    /// Returns:
    /// - `Ok(Some(record))`: key present (the record may be a tombstone)
    /// - `Ok(None)`: key not in this SSTable
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        // First block whose last key is >= key
        let block_idx = self.index.partition_point(|(last, _)| last.as_slice() < key);
        if block_idx >= self.index.len() {
            return Ok(None);
        }

        let block = self.read_block(block_idx)?;
        Ok(block.get(key).cloned())
    }

    /// Range check plus bloom filter. false → key is definitely absent
    pub fn might_contain(&self, key: &[u8]) -> bool {
        if key < self.summary.min_key.as_slice() || key > self.summary.max_key.as_slice() {
            return false;
        }
        self.filter.as_ref().map_or(true, |f| f.may_contain(key))
    }

    /// Read and decode one data block
    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Block> {
        let (_, handle) = &self.index[block_idx];
        let data = read_at(&self.file, handle.offset, handle.len as usize)?;
        Block::decode(&data, &self.path, handle.offset)
    }

    /// Index of the first block that may hold keys >= `key`
    pub(crate) fn seek_block(&self, key: &[u8]) -> usize {
        self.index.partition_point(|(last, _)| last.as_slice() < key)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Read every data block, checking each checksum
    pub fn verify(&self) -> Result<u64> {
        let mut records = 0;
        for i in 0..self.index.len() {
            records += self.read_block(i)?.len() as u64;
        }
        if records != self.summary.entry_count {
            return Err(StrataError::CorruptTable(format!(
                "{}: summary says {} records, blocks hold {}",
                self.path.display(),
                self.summary.entry_count,
                records
            )));
        }
        Ok(records)
    }

    /// Iterate over all records in key order
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), None)
    }

    /// Iterate over records with key >= `start`
    pub fn iter_from(self: &Arc<Self>, start: &[u8]) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), Some(start))
    }

    /// Delete the file once the last reference goes away
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.summary.entry_count
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> &[u8] {
        &self.summary.min_key
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> &[u8] {
        &self.summary.max_key
    }

    pub fn max_seq(&self) -> u64 {
        self.summary.max_seq
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Manifest view of this table
    pub fn meta(&self) -> TableMeta {
        TableMeta {
            id: self.id,
            file_size: self.file_size,
            entry_count: self.summary.entry_count,
            tombstone_count: self.summary.tombstone_count,
            min_key: self.summary.min_key.clone(),
            max_key: self.summary.max_key.clone(),
            min_seq: self.summary.min_seq,
            max_seq: self.summary.max_seq,
        }
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::SeqCst) {
            match fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!("Deleted obsolete SSTable {}", self.path.display()),
                Err(e) => tracing::warn!("Failed to delete obsolete SSTable {}: {}", self.path.display(), e),
            }
        }
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("id", &self.id)
            .field("entries", &self.summary.entry_count)
            .field("file_size", &self.file_size)
            .finish()
    }
}

fn decode_index(mut data: &[u8], path: &Path, offset: u64) -> Result<Vec<(Vec<u8>, BlockHandle)>> {
    let corrupt = || {
        StrataError::CorruptTable(format!("{}: malformed index block at {}", path.display(), offset))
    };

    if data.remaining() < 4 {
        return Err(corrupt());
    }
    let count = data.get_u32_le() as usize;
    let mut index = Vec::with_capacity(count);
    for _ in 0..count {
        let key = read_len_prefixed(&mut data).ok_or_else(corrupt)?;
        if data.remaining() < 12 {
            return Err(corrupt());
        }
        let block_offset = data.get_u64_le();
        let len = data.get_u32_le() as u64;
        if block_offset.checked_add(len).map_or(true, |end| end > offset) {
            return Err(corrupt());
        }
        index.push((key, BlockHandle { offset: block_offset, len }));
    }
    Ok(index)
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, len: usize) -> Result<Vec<u8>> {
    use std::os::unix::fs::FileExt;

    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

#[cfg(windows)]
fn read_at(file: &File, offset: u64, len: usize) -> Result<Vec<u8>> {
    use std::os::windows::fs::FileExt;

    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = file.seek_read(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(buf)
}
