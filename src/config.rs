//! Configuration for StrataDB
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StrataError};

/// Main configuration for a StrataDB instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, SSTables, manifest)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST         (level -> SSTable mapping)
    ///     ├── wal/             (one write-ahead log per live memtable)
    ///     └── sstables/        (SSTable files)
    pub data_dir: PathBuf,

    /// Create the database if `data_dir` holds no manifest yet
    pub create_if_missing: bool,

    /// Refuse to open a database that already exists
    pub error_if_exists: bool,

    /// Fail `open` when the manifest references a missing or damaged table.
    /// When false such tables are dropped from the manifest with a warning.
    pub paranoid_checks: bool,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before it is frozen and flushed (in bytes)
    pub memtable_size_limit: usize,

    /// Frozen memtables allowed to wait for flush before writers stall
    pub max_immutable_memtables: usize,

    /// Flush the active memtable on `close()`
    pub flush_on_close: bool,

    // -------------------------------------------------------------------------
    // SSTable Configuration
    // -------------------------------------------------------------------------
    /// Uncompressed data block size target (in bytes)
    pub block_size: usize,

    /// Bloom filter bits per key (0 disables the filter)
    pub bloom_bits_per_key: usize,

    /// Data block compression
    pub compression: Compression,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Number of levels (L0 .. L{num_levels - 1})
    pub num_levels: usize,

    /// L0 table count that triggers an L0 -> L1 compaction
    pub l0_compaction_trigger: usize,

    /// Byte budget of L1; level n holds `level_base_bytes * fanout^(n-1)`
    pub level_base_bytes: u64,

    /// Size ratio between adjacent levels
    pub level_fanout: u64,

    /// Compaction output files are split at this size (in bytes)
    pub target_file_size: u64,

    /// Let the background worker compact automatically after flushes
    pub background_compaction: bool,

    /// Attempts for a failed flush/compaction before giving up
    pub max_background_retries: u32,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Data block compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl Compression {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Compression::None),
            1 => Some(Compression::Lz4),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./strata_data"),
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: true,
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            max_immutable_memtables: 2,
            flush_on_close: true,
            block_size: 4 * 1024,
            bloom_bits_per_key: 10,
            compression: Compression::Lz4,
            num_levels: 7,
            l0_compaction_trigger: 4,
            level_base_bytes: 10 * 1024 * 1024, // 10 MB
            level_fanout: 10,
            target_file_size: 2 * 1024 * 1024, // 2 MB
            background_compaction: true,
            max_background_retries: 5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.memtable_size_limit == 0 {
            return Err(StrataError::Config("memtable_size_limit must be > 0".into()));
        }
        if self.max_immutable_memtables == 0 {
            return Err(StrataError::Config("max_immutable_memtables must be >= 1".into()));
        }
        if self.block_size < 64 {
            return Err(StrataError::Config(format!(
                "block_size must be >= 64, got {}",
                self.block_size
            )));
        }
        if self.num_levels < 2 {
            return Err(StrataError::Config(format!(
                "num_levels must be >= 2, got {}",
                self.num_levels
            )));
        }
        if self.l0_compaction_trigger == 0 {
            return Err(StrataError::Config("l0_compaction_trigger must be >= 1".into()));
        }
        if self.level_fanout < 2 {
            return Err(StrataError::Config("level_fanout must be >= 2".into()));
        }
        if self.level_base_bytes == 0 || self.target_file_size == 0 {
            return Err(StrataError::Config(
                "level_base_bytes and target_file_size must be > 0".into(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(StrataError::Config("EveryNEntries count must be >= 1".into()));
        }
        Ok(())
    }

    /// Byte budget for a level >= 1
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut bytes = self.level_base_bytes;
        for _ in 1..level {
            bytes = bytes.saturating_mul(self.level_fanout);
        }
        bytes
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.config.create_if_missing = create;
        self
    }

    pub fn error_if_exists(mut self, error: bool) -> Self {
        self.config.error_if_exists = error;
        self
    }

    pub fn paranoid_checks(mut self, paranoid: bool) -> Self {
        self.config.paranoid_checks = paranoid;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn max_immutable_memtables(mut self, count: usize) -> Self {
        self.config.max_immutable_memtables = count;
        self
    }

    pub fn flush_on_close(mut self, flush: bool) -> Self {
        self.config.flush_on_close = flush;
        self
    }

    /// Set the data block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    pub fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.config.bloom_bits_per_key = bits;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn num_levels(mut self, levels: usize) -> Self {
        self.config.num_levels = levels;
        self
    }

    pub fn l0_compaction_trigger(mut self, count: usize) -> Self {
        self.config.l0_compaction_trigger = count;
        self
    }

    pub fn level_base_bytes(mut self, bytes: u64) -> Self {
        self.config.level_base_bytes = bytes;
        self
    }

    pub fn level_fanout(mut self, fanout: u64) -> Self {
        self.config.level_fanout = fanout;
        self
    }

    pub fn target_file_size(mut self, bytes: u64) -> Self {
        self.config.target_file_size = bytes;
        self
    }

    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    pub fn max_background_retries(mut self, retries: u32) -> Self {
        self.config.max_background_retries = retries;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
