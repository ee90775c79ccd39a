//! Tests for WAL Writer
//!
//! These tests verify:
//! - LSN assignment for single operations and batches
//! - Reopening continues numbering after the last entry
//! - Sync strategies and the uncommitted counter
//! - Truncation
//! - File size tracking

use std::fs;
use std::path::PathBuf;

use stratadb::config::WalSyncStrategy;
use stratadb::error::StrataError;
use stratadb::wal::{BatchOp, Operation, WalReader, WalRecovery, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("wal_000001.log");
    (temp_dir, wal_path)
}

fn put(i: usize) -> Operation {
    Operation::Put {
        key: format!("key{}", i).into_bytes(),
        value: format!("value{}", i).into_bytes(),
    }
}

// =============================================================================
// LSN Tests
// =============================================================================

#[test]
fn test_lsns_start_at_one_and_increase() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();

    assert_eq!(writer.current_lsn(), 1);
    assert_eq!(writer.append(&put(0)).unwrap(), 1);
    assert_eq!(writer.append(&put(1)).unwrap(), 2);
    assert_eq!(writer.append(&put(2)).unwrap(), 3);
    assert_eq!(writer.current_lsn(), 4);
}

#[test]
fn test_batch_reserves_one_lsn_per_op() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();

    let batch = Operation::Batch {
        ops: vec![
            BatchOp::Put { key: b"a".to_vec(), value: b"1".to_vec() },
            BatchOp::Put { key: b"b".to_vec(), value: b"2".to_vec() },
            BatchOp::Delete { key: b"c".to_vec() },
        ],
    };
    assert_eq!(writer.append(&batch).unwrap(), 1);
    assert_eq!(writer.append(&put(9)).unwrap(), 4);
}

#[test]
fn test_empty_batch_is_rejected() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();

    let err = writer.append(&Operation::Batch { ops: vec![] }).unwrap_err();
    assert!(matches!(err, StrataError::InvalidArgument(_)));
    assert_eq!(writer.current_lsn(), 1);
}

#[test]
fn test_reopen_continues_numbering() {
    let (_temp, path) = setup_temp_wal();
    {
        let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
        for i in 0..5 {
            writer.append(&put(i)).unwrap();
        }
    }

    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.current_lsn(), 6);
    assert_eq!(writer.append(&put(5)).unwrap(), 6);

    let (entries, _) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 6);
}

#[test]
fn test_open_at_starts_from_given_lsn() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open_at(&path, WalSyncStrategy::EveryWrite, 500).unwrap();
    assert_eq!(writer.append(&put(0)).unwrap(), 500);

    let mut reader = WalReader::open(&path).unwrap();
    assert_eq!(reader.next_entry().unwrap().unwrap().lsn, 500);
}

// =============================================================================
// Sync Strategy Tests
// =============================================================================

#[test]
fn test_every_write_leaves_nothing_uncommitted() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    writer.append(&put(0)).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

#[test]
fn test_every_n_entries_syncs_on_nth() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryNEntries { count: 3 }).unwrap();

    writer.append(&put(0)).unwrap();
    writer.append(&put(1)).unwrap();
    assert_eq!(writer.uncommitted_count(), 2);

    writer.append(&put(2)).unwrap();
    assert_eq!(writer.uncommitted_count(), 0);

    writer.append(&put(3)).unwrap();
    writer.sync().unwrap();
    assert_eq!(writer.uncommitted_count(), 0);
}

#[test]
fn test_unsynced_entries_are_still_readable() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryNEntries { count: 100 }).unwrap();
    writer.append(&put(0)).unwrap();
    writer.append(&put(1)).unwrap();

    // Appends reach the OS even before an fsync
    let (entries, _) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 2);
}

// =============================================================================
// Size and Truncation Tests
// =============================================================================

#[test]
fn test_size_matches_file_length() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..10 {
        writer.append(&put(i)).unwrap();
    }
    assert_eq!(writer.size(), fs::metadata(&path).unwrap().len());
    assert_eq!(writer.path(), path.as_path());
}

#[test]
fn test_truncate_empties_file_but_keeps_numbering() {
    let (_temp, path) = setup_temp_wal();
    let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..3 {
        writer.append(&put(i)).unwrap();
    }

    writer.truncate().unwrap();
    assert_eq!(writer.size(), 0);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    assert_eq!(writer.append(&put(3)).unwrap(), 4);
    let (entries, _) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].lsn, 4);
}
