//! Record types shared by the memtable, SSTables and compaction.

/// Value half of a record: either live bytes or a deletion marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

/// A versioned value stored under a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Sequence number of the mutation that produced this record
    pub seq: u64,

    pub entry: Entry,
}

impl Record {
    pub fn value(seq: u64, value: Vec<u8>) -> Self {
        Self {
            seq,
            entry: Entry::Value(value),
        }
    }

    pub fn tombstone(seq: u64) -> Self {
        Self {
            seq,
            entry: Entry::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.entry, Entry::Tombstone)
    }

    /// Live value bytes, `None` for a tombstone
    pub fn as_value(&self) -> Option<&[u8]> {
        match &self.entry {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    pub fn into_value(self) -> Option<Vec<u8>> {
        match self.entry {
            Entry::Value(v) => Some(v),
            Entry::Tombstone => None,
        }
    }

    /// Payload bytes (0 for a tombstone)
    pub fn value_len(&self) -> usize {
        self.as_value().map_or(0, |v| v.len())
    }
}
