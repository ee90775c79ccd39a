//! Merge Iterator
//!
//! K-way merge of sorted record streams, used by compaction and by scans.
//!
//! ```text
//!   source 0: a@9  c@7
//!   source 1: a@3  b@2  c@5        →  a@9  b@2  c@7
//!   source 2: b@1
//! ```
//!
//! Output is ordered by key; for each key only the record with the highest
//! sequence number is yielded. Ties on sequence go to the lower source
//! index. Tombstones are passed through, the caller decides what to do
//! with them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, StrataError};
use crate::record::Record;

/// A sorted stream of records from one source
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Record)>> + 'a>;

struct HeapEntry {
    key: Vec<u8>,
    record: Record,
    source: usize,
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: the smallest key, then the highest seq, then
    // the lowest source must compare greatest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.record.seq.cmp(&other.record.seq))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

pub struct MergeIterator<'a> {
    sources: Vec<RecordIter<'a>>,
    heap: BinaryHeap<HeapEntry>,
    /// Error hit while priming or advancing; reported on the next call
    pending_error: Option<StrataError>,
    done: bool,
}

impl<'a> MergeIterator<'a> {
    /// Sources should be given newest first
    pub fn new(sources: Vec<RecordIter<'a>>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_error: None,
            done: false,
        };
        for source in 0..merge.sources.len() {
            if let Err(e) = merge.advance(source) {
                merge.pending_error = Some(e);
                break;
            }
        }
        merge
    }

    /// Pull the next record of `source` into the heap
    fn advance(&mut self, source: usize) -> Result<()> {
        if let Some(item) = self.sources[source].next() {
            let (key, record) = item?;
            self.heap.push(HeapEntry { key, record, source });
        }
        Ok(())
    }

    fn fail(&mut self, e: StrataError) -> Option<Result<(Vec<u8>, Record)>> {
        self.done = true;
        self.heap.clear();
        Some(Err(e))
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<(Vec<u8>, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            return self.fail(e);
        }

        let top = match self.heap.pop() {
            Some(top) => top,
            None => {
                self.done = true;
                return None;
            }
        };
        if let Err(e) = self.advance(top.source) {
            return self.fail(e);
        }

        // Drop older versions of the same key
        while self.heap.peek().is_some_and(|e| e.key == top.key) {
            if let Some(shadowed) = self.heap.pop() {
                if let Err(e) = self.advance(shadowed.source) {
                    return self.fail(e);
                }
            }
        }

        Some(Ok((top.key, top.record)))
    }
}
