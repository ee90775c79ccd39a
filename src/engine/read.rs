//! Read path
//!
//! Every read works on a snapshot: the memtable set is cloned first, then
//! the current level version. A flush installs its SSTable before it drops
//! the frozen memtable, so this order never misses a record.
//!
//! The active memtable keeps changing under a reader. Multi-key reads take
//! everything they need from it under one read lock, and a batch is applied
//! under one write lock, so a reader never sees half a batch.

use std::ops::Bound;

use crate::error::{Result, StrataError};
use crate::record::Record;
use crate::storage::{MergeIterator, RecordIter, Version};

use super::{Engine, MemTables};

/// Filters for `scan` and `list_keys`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Only keys starting with this prefix
    pub prefix: Option<Vec<u8>>,
    /// Only keys strictly greater than this one
    pub start_after: Option<Vec<u8>>,
    /// Stop after this many live keys
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn start_after(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.start_after = Some(key.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// First key a scan needs to look at
    fn seek_key(&self) -> Vec<u8> {
        match (&self.prefix, &self.start_after) {
            (Some(p), Some(s)) => p.max(s).clone(),
            (Some(p), None) => p.clone(),
            (None, Some(s)) => s.clone(),
            (None, None) => Vec::new(),
        }
    }
}

impl Engine {
    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active memtable
    /// 2. Frozen memtables (newest first)
    /// 3. L0 SSTables (newest first), then L1..Ln
    ///
    /// The first record found decides; a tombstone means not found.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let memtables = self.inner.memtables();
        let version = self.inner.levels.current();
        Ok(lookup(&memtables, &version, key)?.and_then(Record::into_value))
    }

    /// Look up several keys against one consistent snapshot
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        let memtables = self.inner.memtables();
        let version = self.inner.levels.current();
        let active = memtables.active.get_many(keys);
        keys.iter()
            .zip(active)
            .map(|(key, found)| {
                let record = match found {
                    Some(record) => Some(record),
                    None => lookup_below_active(&memtables, &version, key.as_ref())?,
                };
                Ok(record.and_then(Record::into_value))
            })
            .collect()
    }

    /// Live key-value pairs in key order, filtered by `options`
    pub fn scan(&self, options: &ScanOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let memtables = self.inner.memtables();
        let version = self.inner.levels.current();

        let mut out = Vec::new();
        for item in scan_snapshot(&memtables, &version, options) {
            let (key, record) = item?;
            if options.limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
            match passes(options, &key) {
                Filter::Keep => {}
                Filter::Skip => continue,
                Filter::Stop => break,
            }
            if let Some(value) = record.into_value() {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Live keys in key order, filtered by `options`
    pub fn list_keys(&self, options: &ScanOptions) -> Result<Vec<Vec<u8>>> {
        Ok(self.scan(options)?.into_iter().map(|(k, _)| k).collect())
    }
}

pub(crate) fn lookup(memtables: &MemTables, version: &Version, key: &[u8]) -> Result<Option<Record>> {
    match memtables.active.get(key) {
        Some(record) => Ok(Some(record)),
        None => lookup_below_active(memtables, version, key),
    }
}

/// Frozen memtables (newest first), then the levels
fn lookup_below_active(memtables: &MemTables, version: &Version, key: &[u8]) -> Result<Option<Record>> {
    for frozen in &memtables.immutable {
        if let Some(record) = frozen.memtable.get(key) {
            return Ok(Some(record));
        }
    }
    version.get(key)
}

/// Merge every source of the snapshot, newest first
fn scan_snapshot<'a>(memtables: &'a MemTables, version: &Version, options: &ScanOptions) -> MergeIterator<'a> {
    let seek = options.seek_key();
    let mut sources: Vec<RecordIter<'a>> = Vec::new();

    sources.push(Box::new(memtables.active.snapshot_from(&seek).into_iter().map(Ok::<_, StrataError>)));
    for frozen in &memtables.immutable {
        sources.push(Box::new(frozen.memtable.range_from(Bound::Included(seek.clone())).map(Ok::<_, StrataError>)));
    }
    for table in version.level(0) {
        sources.push(Box::new(table.iter_from(&seek)));
    }
    for level in 1..version.num_levels() {
        if !version.level(level).is_empty() {
            sources.push(Box::new(version.level_iter(level, Some(&seek))));
        }
    }

    MergeIterator::new(sources)
}

enum Filter {
    Keep,
    Skip,
    Stop,
}

fn passes(options: &ScanOptions, key: &[u8]) -> Filter {
    if let Some(prefix) = &options.prefix {
        if !key.starts_with(prefix) {
            // Keys are sorted and the scan starts at or after the prefix
            return Filter::Stop;
        }
    }
    if options.start_after.as_deref().is_some_and(|after| key <= after) {
        return Filter::Skip;
    }
    Filter::Keep
}
