//! Tests for LevelManager
//!
//! These tests verify:
//! - Opening a fresh directory creates the manifest
//! - Flushing memtables into L0 and reading them back
//! - Manifest bookkeeping (log number, last sequence, file ids)
//! - Persistence across reopen
//! - Orphan cleanup and handling of missing or corrupt files

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use stratadb::config::Config;
use stratadb::error::StrataError;
use stratadb::memtable::MemTable;
use stratadb::storage::manifest::MANIFEST_FILENAME;
use stratadb::storage::sstable::sstable_path;
use stratadb::storage::{CompactionTask, LevelManager, SSTABLE_DIR};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .num_levels(4)
        .l0_compaction_trigger(4)
        .background_compaction(false)
        .build()
}

/// Memtable holding `key{i}` for i in `range`, seq numbers starting at `first_seq`
fn memtable_with(range: std::ops::Range<usize>, first_seq: u64, tag: &str) -> MemTable {
    let memtable = MemTable::new();
    for (n, i) in range.enumerate() {
        memtable.put(
            format!("key{:04}", i).into_bytes(),
            format!("{}-{}", tag, i).into_bytes(),
            first_seq + n as u64,
        );
    }
    memtable
}

fn value_of(manager: &LevelManager, key: &str) -> Option<Vec<u8>> {
    manager
        .get(key.as_bytes())
        .unwrap()
        .and_then(|record| record.into_value())
}

fn sst_file_count(dir: &Path) -> usize {
    fs::read_dir(dir.join(SSTABLE_DIR))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "sst"))
        .count()
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_creates_layout() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("db");

    let manager = LevelManager::open(&config(&dir)).unwrap();
    assert!(dir.join(MANIFEST_FILENAME).is_file());
    assert!(dir.join(SSTABLE_DIR).is_dir());
    assert_eq!(manager.table_count(), 0);
    assert_eq!(manager.num_levels(), 4);
    assert_eq!(manager.log_number(), 0);
    assert_eq!(manager.last_sequence(), 0);
    assert!(manager.next_file_id() >= 1);
}

#[test]
fn test_file_ids_are_unique_and_increasing() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();

    let a = manager.new_file_id();
    let b = manager.new_file_id();
    assert!(b > a);

    manager.reserve_file_ids(100);
    assert_eq!(manager.new_file_id(), 100);
    manager.reserve_file_ids(50);
    assert_eq!(manager.new_file_id(), 101);
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_flush_creates_l0_table() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();

    let memtable = memtable_with(0..100, 1, "v");
    let meta = manager.flush_memtable(&memtable, 2, 100).unwrap().unwrap();

    assert_eq!(meta.entry_count, 100);
    assert!(sstable_path(manager.sst_dir(), meta.id).is_file());
    assert_eq!(manager.level_stats()[0].tables, 1);
    assert_eq!(manager.level_stats()[0].bytes, meta.file_size);
    assert_eq!(manager.log_number(), 2);
    assert_eq!(manager.last_sequence(), 100);
    assert_eq!(value_of(&manager, "key0042"), Some(b"v-42".to_vec()));
    assert_eq!(value_of(&manager, "missing"), None);
}

#[test]
fn test_flush_empty_memtable_only_advances_log_number() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();

    let result = manager.flush_memtable(&MemTable::new(), 7, 0).unwrap();
    assert!(result.is_none());
    assert_eq!(manager.table_count(), 0);
    assert_eq!(manager.log_number(), 7);
}

#[test]
fn test_log_number_cannot_move_backwards() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();
    manager.flush_memtable(&MemTable::new(), 5, 0).unwrap();

    let err = manager
        .flush_memtable(&memtable_with(0..10, 1, "v"), 3, 10)
        .unwrap_err();
    assert!(matches!(err, StrataError::InvariantViolation(_)));

    // The rejected table is neither installed nor left on disk
    assert_eq!(manager.table_count(), 0);
    assert_eq!(sst_file_count(temp.path()), 0);
}

#[test]
fn test_newer_l0_table_wins() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();

    manager.flush_memtable(&memtable_with(0..50, 1, "old"), 1, 50).unwrap();
    manager.flush_memtable(&memtable_with(25..75, 51, "new"), 2, 100).unwrap();

    assert_eq!(manager.table_count(), 2);
    assert_eq!(value_of(&manager, "key0010"), Some(b"old-10".to_vec()));
    assert_eq!(value_of(&manager, "key0030"), Some(b"new-30".to_vec()));
    assert_eq!(value_of(&manager, "key0070"), Some(b"new-70".to_vec()));

    // L0 is ordered newest first
    let version = manager.current();
    let l0 = version.level(0);
    assert!(l0[0].id() > l0[1].id());
}

#[test]
fn test_tombstone_shadows_older_table() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();

    manager.flush_memtable(&memtable_with(0..10, 1, "v"), 1, 10).unwrap();
    let deletes = MemTable::new();
    deletes.delete(b"key0003".to_vec(), 11);
    manager.flush_memtable(&deletes, 2, 11).unwrap();

    let record = manager.get(b"key0003").unwrap().unwrap();
    assert!(record.is_tombstone());
    assert_eq!(record.seq, 11);
    assert_eq!(value_of(&manager, "key0004"), Some(b"v-4".to_vec()));
}

#[test]
fn test_snapshot_outlives_new_versions() {
    let temp = TempDir::new().unwrap();
    let manager = LevelManager::open(&config(temp.path())).unwrap();

    let before = manager.current();
    manager.flush_memtable(&memtable_with(0..10, 1, "v"), 1, 10).unwrap();

    assert_eq!(before.table_count(), 0);
    assert_eq!(manager.current().table_count(), 1);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_reopen_restores_tables_and_counters() {
    let temp = TempDir::new().unwrap();
    let next_id;
    {
        let manager = LevelManager::open(&config(temp.path())).unwrap();
        manager.flush_memtable(&memtable_with(0..100, 1, "a"), 3, 100).unwrap();
        manager.flush_memtable(&memtable_with(100..200, 101, "b"), 4, 200).unwrap();
        next_id = manager.next_file_id();
    }

    let manager = LevelManager::open(&config(temp.path())).unwrap();
    assert_eq!(manager.table_count(), 2);
    assert_eq!(manager.log_number(), 4);
    assert_eq!(manager.last_sequence(), 200);
    assert!(manager.next_file_id() >= next_id);
    assert_eq!(value_of(&manager, "key0050"), Some(b"a-50".to_vec()));
    assert_eq!(value_of(&manager, "key0150"), Some(b"b-150".to_vec()));
}

#[test]
fn test_open_removes_orphan_files() {
    let temp = TempDir::new().unwrap();
    {
        let manager = LevelManager::open(&config(temp.path())).unwrap();
        manager.flush_memtable(&memtable_with(0..10, 1, "v"), 1, 10).unwrap();
    }

    let sst_dir = temp.path().join(SSTABLE_DIR);
    let orphan = sstable_path(&sst_dir, 99);
    let leftover = sst_dir.join("sstable_000042.sst.tmp");
    fs::write(&orphan, b"not a table").unwrap();
    fs::write(&leftover, b"half written").unwrap();

    let manager = LevelManager::open(&config(temp.path())).unwrap();
    assert!(!orphan.exists());
    assert!(!leftover.exists());
    assert_eq!(manager.table_count(), 1);
    // Ids seen on disk are never handed out again
    assert!(manager.next_file_id() >= 100);
}

#[test]
fn test_missing_table_fails_paranoid_open() {
    let temp = TempDir::new().unwrap();
    let id = {
        let manager = LevelManager::open(&config(temp.path())).unwrap();
        manager
            .flush_memtable(&memtable_with(0..10, 1, "v"), 1, 10)
            .unwrap()
            .unwrap()
            .id
    };
    fs::remove_file(sstable_path(&temp.path().join(SSTABLE_DIR), id)).unwrap();

    let err = LevelManager::open(&config(temp.path())).unwrap_err();
    assert!(matches!(err, StrataError::CorruptTable(_)));
}

#[test]
fn test_missing_table_dropped_without_paranoid_checks() {
    let temp = TempDir::new().unwrap();
    let id = {
        let manager = LevelManager::open(&config(temp.path())).unwrap();
        manager.flush_memtable(&memtable_with(0..10, 1, "a"), 1, 10).unwrap();
        manager
            .flush_memtable(&memtable_with(10..20, 11, "b"), 2, 20)
            .unwrap()
            .unwrap()
            .id
    };
    fs::remove_file(sstable_path(&temp.path().join(SSTABLE_DIR), id)).unwrap();

    let mut lenient = config(temp.path());
    lenient.paranoid_checks = false;
    let manager = LevelManager::open(&lenient).unwrap();
    assert_eq!(manager.table_count(), 1);
    assert_eq!(manager.manifest_state().table_count(), 1);
    assert_eq!(value_of(&manager, "key0005"), Some(b"a-5".to_vec()));
    assert_eq!(value_of(&manager, "key0015"), None);
    drop(manager);

    // The manifest no longer mentions the lost table
    LevelManager::open(&config(temp.path())).unwrap();
}

#[test]
fn test_corrupt_manifest_fails_open() {
    let temp = TempDir::new().unwrap();
    {
        let manager = LevelManager::open(&config(temp.path())).unwrap();
        manager.flush_memtable(&memtable_with(0..10, 1, "v"), 1, 10).unwrap();
    }

    let path = temp.path().join(MANIFEST_FILENAME);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let err = LevelManager::open(&config(temp.path())).unwrap_err();
    assert!(matches!(err, StrataError::CorruptManifest(_)));
}

#[test]
fn test_fewer_levels_than_used_is_rejected() {
    let temp = TempDir::new().unwrap();
    {
        let manager = LevelManager::open(&config(temp.path())).unwrap();
        manager.flush_memtable(&memtable_with(0..10, 1, "v"), 1, 10).unwrap();
        let table = Arc::clone(&manager.current().level(0)[0]);
        let cancel = AtomicBool::new(false);

        // Walk the table down to L3 by trivial moves
        for level in 0..3 {
            let task = CompactionTask {
                level,
                output_level: level + 1,
                score: 1.0,
                inputs: vec![Arc::clone(&table)],
                overlapping: Vec::new(),
            };
            assert!(manager.compact(&task, &cancel).unwrap().trivial_move);
        }
        assert_eq!(manager.level_stats()[3].tables, 1);
    }

    let shallow = Config::builder().data_dir(temp.path()).num_levels(2).build();
    let err = LevelManager::open(&shallow).unwrap_err();
    assert!(matches!(err, StrataError::Config(_)));
}
