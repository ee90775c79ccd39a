//! Level Manager
//!
//! Owns the SSTables, organised into levels, and every change to them.
//!
//! ## Responsibilities
//! - Load the manifest and open its tables on startup
//! - Delete files the manifest does not reference
//! - Flush frozen memtables into L0 tables
//! - Pick and run compactions
//! - Publish each change as one manifest commit plus a version swap

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::record::Record;

use super::compaction::{self, CompactionStats, CompactionTask};
use super::manifest::{Manifest, ManifestEdit, ManifestState};
use super::sstable::{
    parse_sstable_id, sstable_path, SSTableBuilder, SSTableReader, TableMeta, TableOptions,
};
use super::version::Version;

/// Subdirectory of `data_dir` holding SSTable files
pub const SSTABLE_DIR: &str = "sstables";

/// Per-level numbers for stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    /// Live SSTables on the level
    pub tables: usize,
    /// Sum of their file sizes
    pub bytes: u64,
}

/// Manages the levels of SSTables
///
/// ## Concurrency:
/// - `current`: RwLock held only to clone or swap the `Arc<Version>`
/// - `manifest`: Mutex serializing every layout change (flush or compaction)
/// - `compaction_lock`: at most one compaction runs at a time
/// - `next_file_id`: Atomic counter (lock-free)
/// - All methods use `&self`
#[derive(Debug)]
pub struct LevelManager {
    /// Root data directory (holds MANIFEST)
    data_dir: PathBuf,
    /// Directory where SSTables are stored
    sst_dir: PathBuf,

    config: Config,
    options: TableOptions,

    /// Live layout, swapped whole on every change
    current: RwLock<Arc<Version>>,

    manifest: Mutex<Manifest>,

    /// Next id for WAL and SSTable files (atomic, lock-free)
    next_file_id: AtomicU64,

    compaction_lock: Mutex<()>,

    /// Per level, the largest key compacted out of it last time
    compact_pointers: Mutex<Vec<Vec<u8>>>,
}

impl LevelManager {
    /// Open the levels under `config.data_dir`
    ///
    /// On startup:
    /// 1. Load the manifest (or create an empty one)
    /// 2. Open a reader for every table it lists
    /// 3. Drop unreadable tables if `paranoid_checks` is off
    /// 4. Delete unreferenced `.sst` and `.tmp` files
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        let sst_dir = data_dir.join(SSTABLE_DIR);
        fs::create_dir_all(&sst_dir)?;

        let mut manifest = if Manifest::exists(&data_dir) {
            Manifest::load(&data_dir, config.num_levels)?
        } else {
            Manifest::create(&data_dir, config.num_levels)?
        };

        let mut levels: Vec<Vec<Arc<SSTableReader>>> = vec![Vec::new(); config.num_levels];
        let mut dropped: HashSet<u64> = HashSet::new();
        for (level, tables) in manifest.state().levels.iter().enumerate() {
            for meta in tables {
                match open_table(&sst_dir, meta) {
                    Ok(reader) => levels[level].push(Arc::new(reader)),
                    Err(e) if config.paranoid_checks => return Err(e),
                    Err(e) => {
                        tracing::warn!("Dropping table {} from L{}: {}", meta.id, level, e);
                        dropped.insert(meta.id);
                    }
                }
            }
        }
        if !dropped.is_empty() {
            manifest.apply(&ManifestEdit {
                removed: dropped,
                ..Default::default()
            })?;
        }

        let version = Version::from_levels(levels).map_err(|e| {
            StrataError::CorruptManifest(format!("manifest describes an invalid layout: {}", e))
        })?;
        let next_file_id = remove_orphans(&sst_dir, &version.table_ids())?
            .max(manifest.state().next_file_id);

        tracing::info!(
            "Opened {} tables across {} levels (next file id {})",
            version.table_count(),
            version.num_levels(),
            next_file_id
        );

        Ok(Self {
            data_dir,
            sst_dir,
            config: config.clone(),
            options: TableOptions::from_config(config),
            current: RwLock::new(Arc::new(version)),
            compact_pointers: Mutex::new(vec![Vec::new(); config.num_levels]),
            manifest: Mutex::new(manifest),
            next_file_id: AtomicU64::new(next_file_id),
            compaction_lock: Mutex::new(()),
        })
    }

    /// Snapshot of the live layout
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Point lookup across all levels
    ///
    /// Returns the newest record for `key`, which may be a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        self.current().get(key)
    }

    /// Allocate a file id (used for both WAL and SSTable files)
    pub fn new_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Make sure future ids are at least `id`
    pub fn reserve_file_ids(&self, id: u64) {
        self.next_file_id.fetch_max(id, Ordering::SeqCst);
    }

    pub fn next_file_id(&self) -> u64 {
        self.next_file_id.load(Ordering::SeqCst)
    }

    /// Copy of the persisted manifest state
    pub fn manifest_state(&self) -> ManifestState {
        self.manifest.lock().state().clone()
    }

    /// Oldest WAL id whose contents are not yet in an SSTable
    pub fn log_number(&self) -> u64 {
        self.manifest.lock().state().log_number
    }

    /// Highest sequence number persisted in SSTables
    pub fn last_sequence(&self) -> u64 {
        self.manifest.lock().state().last_sequence
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Write a frozen memtable to a new L0 table and record it
    ///
    /// `log_number` is the first WAL id still needed once this memtable is
    /// persisted. An empty memtable only advances the log number.
    pub fn flush_memtable(
        &self,
        memtable: &MemTable,
        log_number: u64,
        last_sequence: u64,
    ) -> Result<Option<TableMeta>> {
        let mut edit = ManifestEdit {
            log_number: Some(log_number),
            last_sequence: Some(last_sequence),
            ..Default::default()
        };

        if memtable.is_empty() {
            edit.next_file_id = Some(self.next_file_id());
            self.install(edit, Vec::new())?;
            return Ok(None);
        }

        let id = self.new_file_id();
        let path = sstable_path(&self.sst_dir, id);
        let mut builder = SSTableBuilder::new(&path, id, self.options)?;
        for (key, record) in memtable.iter() {
            builder.add(&key, &record)?;
        }
        let meta = builder.finish()?;
        let reader = Arc::new(SSTableReader::open(&path, id)?);

        edit.added.push((0, meta.clone()));
        edit.next_file_id = Some(self.next_file_id());
        if let Err(e) = self.install(edit, vec![(0, reader)]) {
            remove_file_logged(&path);
            return Err(e);
        }

        tracing::info!(
            "Flushed memtable to SSTable {} ({} entries, {} bytes)",
            id,
            meta.entry_count,
            meta.file_size
        );
        Ok(Some(meta))
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Whether some level is over its budget
    pub fn needs_compaction(&self) -> bool {
        self.pick_compaction().is_some()
    }

    pub fn pick_compaction(&self) -> Option<CompactionTask> {
        let version = self.current();
        let pointers = self.compact_pointers.lock().clone();
        compaction::pick_compaction(&version, &self.config, &pointers)
    }

    /// Run compactions until no level needs one. Returns how many ran.
    pub fn run_compactions(&self, cancel: &AtomicBool) -> Result<usize> {
        let _guard = self.compaction_lock.lock();
        let mut count = 0;
        while let Some(task) = self.pick_compaction() {
            if cancel.load(Ordering::Acquire) {
                return Err(StrataError::Cancelled("compaction loop".into()));
            }
            self.execute(&task, cancel)?;
            count += 1;
        }
        Ok(count)
    }

    /// Run a single compaction task
    pub fn compact(&self, task: &CompactionTask, cancel: &AtomicBool) -> Result<CompactionStats> {
        let _guard = self.compaction_lock.lock();
        self.execute(task, cancel)
    }

    fn execute(&self, task: &CompactionTask, cancel: &AtomicBool) -> Result<CompactionStats> {
        let version = self.current();
        let live = version.table_ids();
        if task.input_ids().iter().any(|id| !live.contains(id)) {
            return Err(StrataError::InvariantViolation(format!(
                "compaction inputs are no longer live: {}",
                task.describe()
            )));
        }

        tracing::info!("Compacting {}", task.describe());

        let mut stats = CompactionStats {
            level: task.level,
            output_level: task.output_level,
            input_tables: task.inputs.len() + task.overlapping.len(),
            bytes_read: task.input_bytes(),
            ..Default::default()
        };

        if task.is_trivial_move() {
            let table = &task.inputs[0];
            let edit = ManifestEdit {
                added: vec![(task.output_level, table.meta())],
                removed: [table.id()].into_iter().collect(),
                ..Default::default()
            };
            self.install(edit, vec![(task.output_level, Arc::clone(table))])?;
            self.advance_pointer(task);

            stats.output_tables = 1;
            stats.records_written = table.entry_count();
            stats.trivial_move = true;
            tracing::info!("Moved SSTable {} to L{}", table.id(), task.output_level);
            return Ok(stats);
        }

        let output = compaction::merge_tables(
            task,
            &version,
            &self.sst_dir,
            self.options,
            self.config.target_file_size,
            &|| self.new_file_id(),
            cancel,
        )?;

        let mut added = Vec::with_capacity(output.tables.len());
        let mut readers = Vec::with_capacity(output.tables.len());
        let opened: Result<()> = output.tables.iter().try_for_each(|meta| {
            let reader = Arc::new(SSTableReader::open(&sstable_path(&self.sst_dir, meta.id), meta.id)?);
            added.push((task.output_level, meta.clone()));
            readers.push((task.output_level, reader));
            Ok(())
        });
        let committed = opened.and_then(|()| {
            let edit = ManifestEdit {
                added,
                removed: task.input_ids().into_iter().collect(),
                next_file_id: Some(self.next_file_id()),
                ..Default::default()
            };
            self.install(edit, readers)
        });
        if let Err(e) = committed {
            for meta in &output.tables {
                remove_file_logged(&sstable_path(&self.sst_dir, meta.id));
            }
            return Err(e);
        }

        // Inputs are deleted once the last snapshot using them is gone
        for table in task.inputs.iter().chain(task.overlapping.iter()) {
            table.mark_obsolete();
        }
        self.advance_pointer(task);

        stats.output_tables = output.tables.len();
        stats.bytes_written = output.tables.iter().map(|t| t.file_size).sum();
        stats.records_written = output.records_written;
        stats.tombstones_dropped = output.tombstones_dropped;
        tracing::info!(
            "Compaction L{} -> L{} done: {} tables in, {} out, {} bytes written, {} tombstones dropped",
            stats.level,
            stats.output_level,
            stats.input_tables,
            stats.output_tables,
            stats.bytes_written,
            stats.tombstones_dropped
        );
        Ok(stats)
    }

    fn advance_pointer(&self, task: &CompactionTask) {
        if task.level == 0 {
            return;
        }
        if let Some(max) = task.inputs.iter().map(|t| t.max_key()).max() {
            let mut pointers = self.compact_pointers.lock();
            if let Some(p) = pointers.get_mut(task.level) {
                *p = max.to_vec();
            }
        }
    }

    /// Commit `edit` to the manifest, then publish the matching version
    fn install(&self, edit: ManifestEdit, added: Vec<(usize, Arc<SSTableReader>)>) -> Result<()> {
        let mut manifest = self.manifest.lock();
        let next = self.current().apply(&added, &edit.removed)?;
        manifest.apply(&edit)?;
        *self.current.write() = Arc::new(next);
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn level_stats(&self) -> Vec<LevelStats> {
        let version = self.current();
        (0..version.num_levels())
            .map(|level| LevelStats {
                tables: version.level(level).len(),
                bytes: version.level_bytes(level),
            })
            .collect()
    }

    /// Get the number of SSTables
    pub fn table_count(&self) -> usize {
        self.current().table_count()
    }

    pub fn num_levels(&self) -> usize {
        self.config.num_levels
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the SSTable directory path
    pub fn sst_dir(&self) -> &Path {
        &self.sst_dir
    }
}

// =========================================================================
// Private Helpers
// =========================================================================

/// Open a table listed in the manifest and check it matches its entry
fn open_table(sst_dir: &Path, meta: &TableMeta) -> Result<SSTableReader> {
    let path = sstable_path(sst_dir, meta.id);
    let reader = SSTableReader::open(&path, meta.id).map_err(|e| match e {
        StrataError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            StrataError::CorruptTable(format!("{}: referenced by manifest but missing", path.display()))
        }
        other => other,
    })?;

    let found = reader.meta();
    if found.entry_count != meta.entry_count
        || found.min_key != meta.min_key
        || found.max_key != meta.max_key
        || found.file_size != meta.file_size
    {
        return Err(StrataError::CorruptTable(format!(
            "{}: contents do not match the manifest entry",
            path.display()
        )));
    }
    Ok(reader)
}

/// Delete `.sst` files not in `live` and any leftover `.tmp` files.
/// Returns one past the highest file id seen.
fn remove_orphans(sst_dir: &Path, live: &HashSet<u64>) -> Result<u64> {
    let mut next_id = 1;
    for entry in fs::read_dir(sst_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "tmp") {
            tracing::debug!("Removing leftover temp file {}", path.display());
            remove_file_logged(&path);
            continue;
        }
        if let Some(id) = parse_sstable_id(&path) {
            next_id = next_id.max(id + 1);
            if !live.contains(&id) {
                tracing::debug!("Removing unreferenced SSTable {}", path.display());
                remove_file_logged(&path);
            }
        }
    }
    Ok(next_id)
}

fn remove_file_logged(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!("Failed to remove {}: {}", path.display(), e);
    }
}
