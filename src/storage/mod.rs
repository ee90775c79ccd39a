//! Storage Module
//!
//! Persistent storage: SSTables organised into levels, the manifest that
//! records the layout, and compaction.
//!
//! ## Responsibilities
//! - Persist flushed memtables as immutable sorted tables
//! - Point lookups and ordered scans across levels
//! - Background compaction with tombstone garbage collection
//! - Bloom filters for negative lookups
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── MANIFEST                level -> table mapping
//!   └── sstables/
//!         ├── sstable_000004.sst
//!         └── sstable_000009.sst
//!
//!   L0   [9] [4]            flush output, may overlap
//!   L1   [a..k] [l..z]      disjoint
//!   L2   ...                10x larger per level
//! ```

pub mod compaction;
pub mod manifest;
pub mod merge;
pub mod sstable;
pub mod version;
mod manager;

pub use compaction::{CompactionStats, CompactionTask};
pub use manager::{LevelManager, LevelStats, SSTABLE_DIR};
pub use manifest::{Manifest, ManifestEdit, ManifestState};
pub use merge::{MergeIterator, RecordIter};
pub use sstable::{SSTableBuilder, SSTableIterator, SSTableReader, TableMeta, TableOptions};
pub use version::{LevelIterator, Version};
