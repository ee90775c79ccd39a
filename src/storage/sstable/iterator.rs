//! SSTable Iterator
//!
//! Sequential iteration over the records of an SSTable, one block at a time.

use std::sync::Arc;

use crate::error::Result;
use crate::record::Record;

use super::SSTableReader;

/// Iterator over SSTable records in sorted key order
///
/// Holds a reference to the table, so the file stays alive while iterating
/// even if a compaction has superseded it.
pub struct SSTableIterator {
    table: Arc<SSTableReader>,
    /// Next block to load
    next_block: usize,
    /// Decoded records of the current block
    current: std::vec::IntoIter<(Vec<u8>, Record)>,
    /// Skip records below this key (only relevant for the first block)
    start: Option<Vec<u8>>,
    failed: bool,
}

impl SSTableIterator {
    pub(super) fn new(table: Arc<SSTableReader>, start: Option<&[u8]>) -> Self {
        let next_block = start.map_or(0, |key| table.seek_block(key));
        Self {
            table,
            next_block,
            current: Vec::new().into_iter(),
            start: start.map(|k| k.to_vec()),
            failed: false,
        }
    }

    /// Restart from the first record
    pub fn rewind(&mut self) {
        self.next_block = 0;
        self.current = Vec::new().into_iter();
        self.start = None;
        self.failed = false;
    }

    pub fn table(&self) -> &Arc<SSTableReader> {
        &self.table
    }

    fn load_next_block(&mut self) -> Result<bool> {
        if self.next_block >= self.table.block_count() {
            return Ok(false);
        }
        let block = self.table.read_block(self.next_block)?;
        self.next_block += 1;

        let skip = match self.start.take() {
            Some(start) => block.seek(&start),
            None => 0,
        };
        let mut entries = block.into_entries().into_iter();
        if skip > 0 {
            entries.nth(skip - 1);
        }
        self.current = entries;
        Ok(true)
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<(Vec<u8>, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(item) = self.current.next() {
                return Some(Ok(item));
            }
            match self.load_next_block() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
