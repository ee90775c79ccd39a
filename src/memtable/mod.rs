//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered iteration for SSTable creation
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in a parking_lot RwLock:
//! - Ordered keys (required for SSTable generation)
//! - Readers share the lock; the single writer holds it only per mutation
//! - Iterators re-acquire the read lock for each step instead of holding it

mod table;

pub use table::{MemTable, MemTableIterator};

pub use crate::record::{Entry as MemTableEntry, Record};

/// Fixed per-entry bookkeeping charged by size accounting
pub const ENTRY_OVERHEAD: usize = 32;
