//! Engine Module
//!
//! The database handle: binds the WAL, the memtables and the level manager
//! under one configuration and lifecycle.
//!
//! ## Responsibilities
//! - Recover memtable state from the WAL on startup
//! - Serialize writes (WAL append, then memtable apply)
//! - Freeze full memtables and hand them to the background worker
//! - Resolve reads across memtables and levels
//!
//! ## Write / Read Flow
//! ```text
//!   put/delete ──► WAL ──► active memtable ──(full)──► frozen memtables
//!                                                          │ worker
//!                                                          ▼
//!   get ──► active ──► frozen (newest first) ──► L0 ──► L1 .. Ln
//! ```

mod batch;
mod read;
mod worker;
mod write;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::record::Record;
use crate::storage::{LevelManager, LevelStats, Manifest};
use crate::wal::{self, BatchOp, Operation, WalRecovery, WalWriter};

pub use batch::WriteBatch;
pub use read::ScanOptions;

/// Largest accepted key (64 KiB)
pub const MAX_KEY_SIZE: usize = 64 * 1024;

/// Largest accepted value (64 MiB)
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Subdirectory of `data_dir` holding WAL files
pub const WAL_DIR: &str = "wal";

/// How long a stalled writer or a flush waiter sleeps between checks
const WAIT_SLICE: Duration = Duration::from_millis(100);

// =============================================================================
// Shared State
// =============================================================================

/// A frozen memtable waiting to be flushed, with the WAL that backs it
#[derive(Clone)]
pub(crate) struct ImmutableMemTable {
    pub memtable: Arc<MemTable>,
    pub log_id: u64,
}

/// The set of memtables readers consult, replaced whole on every change
#[derive(Clone)]
pub(crate) struct MemTables {
    pub active: Arc<MemTable>,
    /// Newest first
    pub immutable: Vec<ImmutableMemTable>,
}

/// Everything guarded by the writer mutex
pub(crate) struct WriterState {
    pub wal: WalWriter,
    /// Id of the WAL backing the active memtable
    pub log_id: u64,
}

/// Messages for the background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackgroundTask {
    Flush,
    Compact,
    Shutdown,
}

pub(crate) struct EngineInner {
    config: Config,
    wal_dir: PathBuf,

    // --- Read side ---
    memtables: RwLock<Arc<MemTables>>,
    levels: LevelManager,

    // --- Write side ---
    writer: Mutex<WriterState>,

    // --- Background coordination ---
    tasks: Sender<BackgroundTask>,
    /// Paired with `work_done`; guards nothing else
    work_lock: Mutex<()>,
    /// Signalled whenever the worker finishes a task
    work_done: Condvar,
    /// Set on close/drop; also cancels a running compaction
    shutdown: AtomicBool,
    background_error: Mutex<Option<String>>,

    // --- Counters ---
    flushes: AtomicU64,
    compactions: AtomicU64,
}

/// Point-in-time numbers describing an engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Last sequence number handed out (a write that failed in the WAL
    /// still consumes its number)
    pub last_sequence: u64,
    /// Approximate bytes held by the active memtable (keys, values and
    /// per-entry overhead)
    pub memtable_bytes: usize,
    /// Keys in the active memtable, tombstones included
    pub memtable_entries: usize,
    /// Frozen memtables waiting to be flushed
    pub immutable_memtables: usize,
    /// Per-level table counts and sizes, level 0 first
    pub levels: Vec<LevelStats>,
    /// Memtable flushes completed since open
    pub flushes: u64,
    /// Compactions completed since open, background and manual
    pub compactions: u64,
    /// Set once a fatal failure (a background job that exhausted its
    /// retries, or a WAL write error) has made the engine read-only
    pub background_error: Option<String>,
}

impl EngineStats {
    /// Live SSTables across all levels
    pub fn table_count(&self) -> usize {
        self.levels.iter().map(|l| l.tables).sum()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/delete/write): serialized by the writer mutex, which
///   covers the WAL append and the memtable apply
/// - **Reads** (get/scan): lock-free apart from cloning two `Arc`s (the
///   memtable set, then the current level version)
/// - **Background**: one worker thread flushes frozen memtables and runs
///   compactions; it never blocks readers
///
/// Many engines can be open in one process, each on its own directory.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config and check the directory against
    ///    `create_if_missing` / `error_if_exists`
    /// 2. Load the manifest and the SSTables it lists
    /// 3. Replay WAL files not yet persisted into the active memtable
    /// 4. Open a fresh WAL and start the background worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let data_dir = config.data_dir.clone();
        let exists = Manifest::exists(&data_dir);
        if exists && config.error_if_exists {
            return Err(StrataError::InvalidArgument(format!(
                "database already exists at {}",
                data_dir.display()
            )));
        }
        if !exists && !config.create_if_missing {
            return Err(StrataError::InvalidArgument(format!(
                "no database at {} and create_if_missing is off",
                data_dir.display()
            )));
        }

        fs::create_dir_all(&data_dir)?;
        let wal_dir = data_dir.join(WAL_DIR);
        fs::create_dir_all(&wal_dir)?;

        let levels = LevelManager::open(&config)?;
        let log_number = levels.log_number();
        let persisted_seq = levels.last_sequence();

        // Replay every log the manifest has not absorbed yet
        let memtable = MemTable::new();
        let logs = wal::list_wal_files(&wal_dir)?;
        if let Some((max_id, _)) = logs.last() {
            levels.reserve_file_ids(max_id + 1);
        }
        let mut last_seq = persisted_seq;
        for (id, path) in logs.iter().filter(|(id, _)| *id >= log_number) {
            let result = WalRecovery::replay(path, |entry| {
                last_seq = last_seq.max(entry.last_seq());
                apply_operation(&memtable, entry.lsn, entry.operation, persisted_seq);
                Ok(())
            })?;
            tracing::info!(
                "Replayed WAL {}: {} entries, last_lsn={}{}",
                id,
                result.entries_recovered,
                result.last_lsn,
                if result.was_truncated {
                    format!(", truncated {} torn bytes", result.bytes_truncated)
                } else {
                    String::new()
                }
            );
        }

        let log_id = levels.new_file_id();
        let wal = WalWriter::open_at(&wal::wal_path(&wal_dir, log_id), config.wal_sync_strategy, last_seq + 1)?;

        // Nothing to keep from the old logs: let the manifest forget them
        if memtable.is_empty() && logs.iter().any(|(id, _)| *id >= log_number) {
            levels.flush_memtable(&memtable, log_id, last_seq)?;
        }
        let removed = wal::remove_obsolete(&wal_dir, levels.log_number())?;
        if removed > 0 {
            tracing::debug!("Removed {} obsolete WAL files", removed);
        }

        if !memtable.is_empty() {
            tracing::info!(
                "Recovered {} entries ({} bytes) into the memtable",
                memtable.entry_count(),
                memtable.approximate_size()
            );
        }

        let (tasks, receiver) = channel::unbounded();
        let inner = Arc::new(EngineInner {
            wal_dir,
            memtables: RwLock::new(Arc::new(MemTables {
                active: Arc::new(memtable),
                immutable: Vec::new(),
            })),
            levels,
            writer: Mutex::new(WriterState { wal, log_id }),
            tasks,
            work_lock: Mutex::new(()),
            work_done: Condvar::new(),
            shutdown: AtomicBool::new(false),
            background_error: Mutex::new(None),
            flushes: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            config,
        });

        let handle = worker::spawn(Arc::clone(&inner), receiver)?;
        if inner.config.background_compaction && inner.levels.needs_compaction() {
            inner.schedule(BackgroundTask::Compact);
        }

        tracing::info!("Opened StrataDB at {} (next seq {})", data_dir.display(), last_seq + 1);

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Freeze the active memtable and wait until every frozen memtable is
    /// persisted in an SSTable
    pub fn flush(&self) -> Result<()> {
        self.inner.check_writable()?;
        {
            let mut writer = self.inner.writer.lock();
            self.inner.freeze(&mut writer)?;
        }
        self.inner.wait_for_flushes()
    }

    /// Flush, then run compactions until no level needs one
    ///
    /// Returns the number of compactions executed. On a fully compacted
    /// layout this does nothing and returns 0.
    pub fn compact(&self) -> Result<usize> {
        self.flush()?;
        let count = self.inner.levels.run_compactions(&self.inner.shutdown)?;
        self.inner.compactions.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    /// Close the engine gracefully
    ///
    /// Flushes the memtable (if `flush_on_close`), stops the background
    /// worker and syncs the WAL.
    pub fn close(self) -> Result<()> {
        let flushed = if self.inner.config.flush_on_close && !self.inner.is_shutting_down() {
            self.flush()
        } else {
            Ok(())
        };
        self.stop_worker();
        let synced = self.inner.writer.lock().wal.sync();
        tracing::info!("Closed StrataDB at {}", self.inner.config.data_dir.display());
        flushed.and(synced)
    }

    fn stop_worker(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.schedule(BackgroundTask::Shutdown);
            if handle.join().is_err() {
                tracing::error!("Background worker panicked");
            }
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn stats(&self) -> EngineStats {
        let memtables = self.inner.memtables();
        let last_sequence = self.inner.writer.lock().wal.current_lsn() - 1;
        EngineStats {
            last_sequence,
            memtable_bytes: memtables.active.approximate_size(),
            memtable_entries: memtables.active.entry_count(),
            immutable_memtables: memtables.immutable.len(),
            levels: self.inner.levels.level_stats(),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
            compactions: self.inner.compactions.load(Ordering::Relaxed),
            background_error: self.inner.background_error.lock().clone(),
        }
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the WAL directory path
    pub fn wal_dir(&self) -> &Path {
        &self.inner.wal_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> &Path {
        self.inner.levels.sst_dir()
    }

    /// Get the current active memtable size
    pub fn memtable_size(&self) -> usize {
        self.inner.memtables().active.approximate_size()
    }

    /// Get the active memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.inner.memtables().active.entry_count()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.inner.levels.table_count()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Unflushed data stays in the WAL and is replayed on the next open
        self.stop_worker();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.inner.config.data_dir)
            .finish()
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

impl EngineInner {
    pub(crate) fn memtables(&self) -> Arc<MemTables> {
        Arc::clone(&self.memtables.read())
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Writes are refused after shutdown or a fatal background failure
    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(StrataError::ShuttingDown);
        }
        if let Some(message) = self.background_error.lock().as_ref() {
            return Err(StrataError::Background(message.clone()));
        }
        Ok(())
    }

    pub(crate) fn schedule(&self, task: BackgroundTask) {
        if self.tasks.send(task).is_err() {
            tracing::debug!("Background worker gone, dropped {:?}", task);
        }
    }

    pub(crate) fn notify_work_done(&self) {
        let _guard = self.work_lock.lock();
        self.work_done.notify_all();
    }

    /// Sleep until the worker reports progress (or a short timeout passes)
    pub(crate) fn wait_for_work(&self) {
        let mut guard = self.work_lock.lock();
        self.work_done.wait_for(&mut guard, WAIT_SLICE);
    }

    /// Block until no frozen memtable is waiting
    pub(crate) fn wait_for_flushes(&self) -> Result<()> {
        loop {
            if self.memtables().immutable.is_empty() {
                return Ok(());
            }
            if let Some(message) = self.background_error.lock().as_ref() {
                return Err(StrataError::Background(message.clone()));
            }
            if self.is_shutting_down() {
                return Err(StrataError::ShuttingDown);
            }
            self.wait_for_work();
        }
    }
}

/// Apply one logged operation to a memtable, skipping mutations with
/// sequence number <= `skip_through`. Returns the memtable's new size.
pub(crate) fn apply_operation(memtable: &MemTable, lsn: u64, operation: Operation, skip_through: u64) -> usize {
    match operation {
        Operation::Put { key, value } if lsn > skip_through => memtable.put(key, value, lsn),
        Operation::Delete { key } if lsn > skip_through => memtable.delete(key, lsn),
        Operation::Put { .. } | Operation::Delete { .. } => memtable.approximate_size(),
        Operation::Batch { ops } => memtable.apply_batch(
            (lsn..)
                .zip(ops)
                .filter(|(seq, _)| *seq > skip_through)
                .map(|(seq, op)| match op {
                    BatchOp::Put { key, value } => (key, Record::value(seq, value)),
                    BatchOp::Delete { key } => (key, Record::tombstone(seq)),
                }),
        ),
    }
}
