//! SSTable Builder
//!
//! Writes sorted records to a new SSTable file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BufMut;

use crate::error::{Result, StrataError};
use crate::record::Record;

use super::{BlockBuilder, BlockHandle, BloomFilter, Footer, Summary, TableMeta, TableOptions};

/// Builder for creating new SSTables from sorted records
///
/// Output goes to `<path>.tmp` and is renamed into place by `finish()`, so
/// a crash never leaves a half-written file under the final name. A builder
/// dropped before `finish()` deletes its temp file.
pub struct SSTableBuilder {
    id: u64,
    /// Final file path
    path: PathBuf,
    tmp_path: PathBuf,
    /// Buffered writer for performance
    writer: Option<BufWriter<File>>,
    options: TableOptions,
    block: BlockBuilder,
    /// Index: last key of each block → its location
    index: Vec<(Vec<u8>, BlockHandle)>,
    /// Current write position
    offset: u64,
    key_hashes: Vec<u128>,
    summary: Summary,
    last_key: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    pub fn new(path: &Path, id: u64, options: TableOptions) -> Result<Self> {
        let tmp_path = tmp_path_for(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
            options,
            block: BlockBuilder::new(options.block_size + 1024),
            index: Vec::new(),
            offset: 0,
            key_hashes: Vec::new(),
            summary: Summary {
                min_seq: u64::MAX,
                ..Summary::default()
            },
            last_key: None,
        })
    }

    /// Add a record. Keys must be strictly ascending.
    pub fn add(&mut self, key: &[u8], record: &Record) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(StrataError::InvariantViolation(format!(
                    "SSTable {} keys out of order: {:?} after {:?}",
                    self.id,
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        if self.summary.entry_count == 0 {
            self.summary.min_key = key.to_vec();
        }
        self.summary.entry_count += 1;
        if record.is_tombstone() {
            self.summary.tombstone_count += 1;
        }
        self.summary.min_seq = self.summary.min_seq.min(record.seq);
        self.summary.max_seq = self.summary.max_seq.max(record.seq);

        if self.options.bloom_bits_per_key > 0 {
            self.key_hashes.push(BloomFilter::hash_key(key));
        }

        self.block.add(key, record);
        self.last_key = Some(key.to_vec());

        if self.block.estimated_size() >= self.options.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let last_key = self.block.last_key().to_vec();
        let data = self.block.finish(self.options.compression);
        let handle = BlockHandle {
            offset: self.offset,
            len: data.len() as u64,
        };
        self.write(&data)?;
        self.index.push((last_key, handle));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| StrataError::InvariantViolation("SSTable builder already finished".into()))?;
        writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Number of records added so far
    pub fn entry_count(&self) -> u64 {
        self.summary.entry_count
    }

    /// Bytes written plus the pending block
    pub fn estimated_file_size(&self) -> u64 {
        self.offset + self.block.estimated_size() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finish building: write index, filter, summary and footer, sync, and
    /// rename into place
    pub fn finish(mut self) -> Result<TableMeta> {
        if self.summary.entry_count == 0 {
            return Err(StrataError::InvariantViolation(format!(
                "SSTable {} finished with no records",
                self.id
            )));
        }
        self.flush_block()?;
        self.summary.max_key = self.last_key.clone().unwrap_or_default();

        let mut index = Vec::new();
        index.put_u32_le(self.index.len() as u32);
        for (key, handle) in &self.index {
            index.put_u32_le(key.len() as u32);
            index.put_slice(key);
            index.put_u64_le(handle.offset);
            index.put_u32_le(handle.len as u32);
        }

        let filter = if self.options.bloom_bits_per_key > 0 {
            BloomFilter::from_hashes(&self.key_hashes, self.options.bloom_bits_per_key).encode()
        } else {
            Vec::new()
        };
        let summary = self.summary.encode();

        let mut meta_hasher = crc32fast::Hasher::new();
        meta_hasher.update(&index);
        meta_hasher.update(&filter);
        meta_hasher.update(&summary);

        let index_handle = BlockHandle {
            offset: self.offset,
            len: index.len() as u64,
        };
        self.write(&index)?;
        let filter_handle = BlockHandle {
            offset: self.offset,
            len: filter.len() as u64,
        };
        self.write(&filter)?;
        let summary_handle = BlockHandle {
            offset: self.offset,
            len: summary.len() as u64,
        };
        self.write(&summary)?;

        let footer = Footer {
            index: index_handle,
            filter: filter_handle,
            summary: summary_handle,
            meta_crc: meta_hasher.finalize(),
        };
        self.write(&footer.encode())?;

        let writer = self
            .writer
            .take()
            .ok_or_else(|| StrataError::InvariantViolation("SSTable builder already finished".into()))?;
        let file = writer
            .into_inner()
            .map_err(|e| StrataError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.path)?;

        let summary = std::mem::take(&mut self.summary);
        Ok(TableMeta {
            id: self.id,
            file_size: self.offset,
            entry_count: summary.entry_count,
            tombstone_count: summary.tombstone_count,
            min_key: summary.min_key,
            max_key: summary.max_key,
            min_seq: summary.min_seq,
            max_seq: summary.max_seq,
        })
    }

    /// Give up on this table and remove its temp file
    pub fn abandon(mut self) {
        self.writer.take();
        let _ = fs::remove_file(&self.tmp_path);
    }
}

impl Drop for SSTableBuilder {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = fs::remove_file(&self.tmp_path) {
                tracing::debug!("Could not remove {}: {}", self.tmp_path.display(), e);
            }
        }
    }
}

/// "sstable_000007.sst" → "sstable_000007.sst.tmp"
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
