//! Version
//!
//! An immutable snapshot of which SSTables live at which level.
//!
//! ```text
//!   L0: [t9] [t7] [t4]          overlapping, newest first
//!   L1: [a..f] [g..m] [n..z]    disjoint, sorted by min key
//!   L2: [a..c] [d..k] ...       disjoint, sorted by min key
//! ```
//!
//! Readers clone the current `Arc<Version>` and keep using it while flushes
//! and compactions install new versions. Tables dropped by a newer version
//! stay readable until the last snapshot holding them is released.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::record::Record;

use super::sstable::{SSTableIterator, SSTableReader};

#[derive(Debug, Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<SSTableReader>>>,
}

impl Version {
    /// An empty layout with `num_levels` levels
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
        }
    }

    /// Build a version from unsorted per-level table lists
    pub(crate) fn from_levels(levels: Vec<Vec<Arc<SSTableReader>>>) -> Result<Self> {
        let mut version = Self { levels };
        version.sort_and_check()?;
        Ok(version)
    }

    /// Copy of this version with `removed` tables taken out and `added`
    /// tables placed at their levels
    pub(crate) fn apply(
        &self,
        added: &[(usize, Arc<SSTableReader>)],
        removed: &HashSet<u64>,
    ) -> Result<Self> {
        let mut levels: Vec<Vec<Arc<SSTableReader>>> = self
            .levels
            .iter()
            .map(|tables| {
                tables
                    .iter()
                    .filter(|t| !removed.contains(&t.id()))
                    .cloned()
                    .collect()
            })
            .collect();

        for (level, table) in added {
            let tables = levels.get_mut(*level).ok_or_else(|| {
                StrataError::InvariantViolation(format!(
                    "table {} added to level {} of a {}-level layout",
                    table.id(),
                    level,
                    self.levels.len()
                ))
            })?;
            tables.push(Arc::clone(table));
        }

        Self::from_levels(levels)
    }

    fn sort_and_check(&mut self) -> Result<()> {
        for (level, tables) in self.levels.iter_mut().enumerate() {
            if level == 0 {
                tables.sort_by(|a, b| b.id().cmp(&a.id()));
                continue;
            }
            tables.sort_by(|a, b| a.min_key().cmp(b.min_key()));
            for pair in tables.windows(2) {
                if pair[0].max_key() >= pair[1].min_key() {
                    return Err(StrataError::InvariantViolation(format!(
                        "L{} tables {} and {} overlap",
                        level,
                        pair[0].id(),
                        pair[1].id()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Point lookup: L0 newest first, then one candidate table per level
    ///
    /// The first record found wins, tombstones included.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        for table in &self.levels[0] {
            if let Some(record) = table.get(key)? {
                return Ok(Some(record));
            }
        }

        for tables in &self.levels[1..] {
            if let Some(table) = find_table(tables, key) {
                if let Some(record) = table.get(key)? {
                    return Ok(Some(record));
                }
            }
        }

        Ok(None)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Tables at `level` (newest first for L0, by key otherwise)
    pub fn level(&self, level: usize) -> &[Arc<SSTableReader>] {
        self.levels.get(level).map_or(&[], |t| t.as_slice())
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        self.level(level).iter().map(|t| t.file_size()).sum()
    }

    pub fn table_count(&self) -> usize {
        self.levels.iter().map(|t| t.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        (0..self.levels.len()).map(|l| self.level_bytes(l)).sum()
    }

    /// Ids of every live table
    pub fn table_ids(&self) -> HashSet<u64> {
        self.levels.iter().flatten().map(|t| t.id()).collect()
    }

    /// Tables at `level` whose key range intersects [min, max]
    pub fn overlapping(&self, level: usize, min: &[u8], max: &[u8]) -> Vec<Arc<SSTableReader>> {
        self.level(level)
            .iter()
            .filter(|t| t.min_key() <= max && min <= t.max_key())
            .cloned()
            .collect()
    }

    /// Whether any level deeper than `level` may hold `key`
    pub fn overlaps_below(&self, level: usize, key: &[u8]) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .any(|tables| find_table(tables, key).is_some())
    }

    /// Lazily concatenate the tables of a sorted level (>= 1)
    pub fn level_iter(&self, level: usize, start: Option<&[u8]>) -> LevelIterator {
        let tables: Vec<Arc<SSTableReader>> = self
            .level(level)
            .iter()
            .filter(|t| start.map_or(true, |s| t.max_key() >= s))
            .cloned()
            .collect();
        LevelIterator {
            tables: tables.into_iter(),
            current: None,
            start: start.map(|s| s.to_vec()),
        }
    }
}

/// The table of a sorted level whose range contains `key`
fn find_table<'a>(tables: &'a [Arc<SSTableReader>], key: &[u8]) -> Option<&'a Arc<SSTableReader>> {
    let idx = tables.partition_point(|t| t.max_key() < key);
    tables.get(idx).filter(|t| t.min_key() <= key)
}

/// Iterator over one sorted level, opening tables as it reaches them
pub struct LevelIterator {
    tables: std::vec::IntoIter<Arc<SSTableReader>>,
    current: Option<SSTableIterator>,
    start: Option<Vec<u8>>,
}

impl Iterator for LevelIterator {
    type Item = Result<(Vec<u8>, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iter) = self.current.as_mut() {
                if let Some(item) = iter.next() {
                    return Some(item);
                }
            }
            let table = self.tables.next()?;
            self.current = Some(match self.start.take() {
                Some(start) => table.iter_from(&start),
                None => table.iter(),
            });
        }
    }
}
