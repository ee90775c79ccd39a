//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::ENTRY_OVERHEAD;
use crate::record::Record;

/// In-memory table for recent writes
///
/// Holds only the latest record per key. A write carrying an older sequence
/// number than the stored record is ignored, so replaying a log twice is
/// harmless.
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, Record>>,
    /// Approximate size in bytes
    size: AtomicUsize,
    /// Highest sequence number applied
    max_seq: AtomicU64,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
            max_seq: AtomicU64::new(0),
        }
    }

    /// Get the latest record for a key (read lock)
    ///
    /// A tombstone comes back as `Some`; the caller decides what it means.
    pub fn get(&self, key: &[u8]) -> Option<Record> {
        self.data.read().get(key).cloned()
    }

    /// Put a key-value pair (write lock). Returns the new approximate size.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, seq: u64) -> usize {
        self.apply(key, Record::value(seq, value))
    }

    /// Delete a key (write lock, inserts tombstone). Returns the new approximate size.
    pub fn delete(&self, key: Vec<u8>, seq: u64) -> usize {
        self.apply(key, Record::tombstone(seq))
    }

    /// Insert a record unless a newer one is already stored
    pub fn apply(&self, key: Vec<u8>, record: Record) -> usize {
        let mut data = self.data.write();
        self.apply_locked(&mut data, key, record);
        drop(data);

        self.size.load(Ordering::Relaxed)
    }

    /// Insert several records under one write lock, so a reader sees either
    /// all of them or none. Returns the new approximate size.
    pub fn apply_batch(&self, records: impl IntoIterator<Item = (Vec<u8>, Record)>) -> usize {
        let mut data = self.data.write();
        for (key, record) in records {
            self.apply_locked(&mut data, key, record);
        }
        drop(data);

        self.size.load(Ordering::Relaxed)
    }

    fn apply_locked(&self, data: &mut BTreeMap<Vec<u8>, Record>, key: Vec<u8>, record: Record) {
        let seq = record.seq;
        let added = ENTRY_OVERHEAD + key.len() + record.value_len();

        match data.get_mut(key.as_slice()) {
            Some(existing) if existing.seq > seq => {}
            Some(existing) => {
                let removed = existing.value_len();
                *existing = record;
                let new_len = existing.value_len();
                if new_len >= removed {
                    self.size.fetch_add(new_len - removed, Ordering::Relaxed);
                } else {
                    self.size.fetch_sub(removed - new_len, Ordering::Relaxed);
                }
            }
            None => {
                data.insert(key, record);
                self.size.fetch_add(added, Ordering::Relaxed);
            }
        }
        self.max_seq.fetch_max(seq, Ordering::Relaxed);
    }

    /// Look up several keys under one read lock
    pub fn get_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> Vec<Option<Record>> {
        let data = self.data.read();
        keys.iter().map(|key| data.get(key.as_ref()).cloned()).collect()
    }

    /// Copy of every entry at or after `start`, taken under one read lock
    pub fn snapshot_from(&self, start: &[u8]) -> Vec<(Vec<u8>, Record)> {
        let data = self.data.read();
        data.range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Get approximate size in bytes
    pub fn approximate_size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.approximate_size() >= size_limit
    }

    /// Highest sequence number held (0 when empty)
    pub fn max_sequence(&self) -> u64 {
        self.max_seq.load(Ordering::Relaxed)
    }

    /// Iterate over all entries in sorted key order
    pub fn iter(&self) -> MemTableIterator<'_> {
        self.range_from(Bound::Unbounded)
    }

    /// Iterate in sorted key order starting at `start`
    pub fn range_from(&self, start: Bound<Vec<u8>>) -> MemTableIterator<'_> {
        MemTableIterator {
            table: self,
            next_bound: start,
            exhausted: false,
        }
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over MemTable entries
///
/// Each step takes the read lock just long enough to find the successor of
/// the previous key, so writers are never blocked for a whole scan. Keys
/// inserted behind the cursor are not seen; keys inserted ahead of it are.
pub struct MemTableIterator<'a> {
    table: &'a MemTable,
    next_bound: Bound<Vec<u8>>,
    exhausted: bool,
}

impl Iterator for MemTableIterator<'_> {
    type Item = (Vec<u8>, Record);

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let data = self.table.data.read();
        let lower = match &self.next_bound {
            Bound::Included(k) => Bound::Included(k.as_slice()),
            Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let found = data
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, r)| (k.clone(), r.clone()));
        drop(data);

        match found {
            Some((key, record)) => {
                self.next_bound = Bound::Excluded(key.clone());
                Some((key, record))
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}
