//! Tests for WAL Reader
//!
//! These tests verify:
//! - Sequential reading of valid entries
//! - Torn trailing entries end iteration without an error
//! - Damage followed by more data is reported as corruption
//! - A damaged header is never trusted for its length
//! - LSNs must strictly increase
//! - Rewind and the iterator adapter

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use stratadb::config::WalSyncStrategy;
use stratadb::error::StrataError;
use stratadb::wal::{Operation, WalEntry, WalReader, WalWriter, HEADER_SIZE};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn put(i: usize) -> Operation {
    Operation::Put {
        key: format!("key{}", i).into_bytes(),
        value: format!("value{}", i).into_bytes(),
    }
}

fn write_entries(path: &Path, count: usize) {
    let mut writer = WalWriter::open(path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer.append(&put(i)).unwrap();
    }
}

fn setup_wal(count: usize) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("wal_000001.log");
    write_entries(&path, count);
    (temp_dir, path)
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

fn read_all(path: &Path) -> Vec<WalEntry> {
    let mut reader = WalReader::open(path).unwrap();
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        entries.push(entry);
    }
    entries
}

// =============================================================================
// Basic Reading Tests
// =============================================================================

#[test]
fn test_empty_file_has_no_entries() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("wal_000001.log");
    fs::File::create(&path).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert!(reader.next_entry().unwrap().is_none());
    assert_eq!(reader.torn_tail(), None);
}

#[test]
fn test_reads_entries_in_order() {
    let (_temp, path) = setup_wal(10);

    let entries = read_all(&path);
    assert_eq!(entries.len(), 10);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.lsn, i as u64 + 1);
        assert_eq!(entry.operation, put(i));
    }
}

#[test]
fn test_valid_len_reaches_file_len() {
    let (_temp, path) = setup_wal(3);

    let mut reader = WalReader::open(&path).unwrap();
    while reader.next_entry().unwrap().is_some() {}
    assert_eq!(reader.valid_len(), reader.file_len());
    assert_eq!(reader.file_len(), fs::metadata(&path).unwrap().len());
}

#[test]
fn test_rewind_restarts_from_first_entry() {
    let (_temp, path) = setup_wal(3);

    let mut reader = WalReader::open(&path).unwrap();
    while reader.next_entry().unwrap().is_some() {}

    reader.rewind().unwrap();
    assert_eq!(reader.next_entry().unwrap().unwrap().lsn, 1);
}

#[test]
fn test_iterator_yields_all_entries() {
    let (_temp, path) = setup_wal(5);

    let iter = WalReader::open(&path).unwrap().entries();
    let lsns: Vec<u64> = iter.map(|e| e.unwrap().lsn).collect();
    assert_eq!(lsns, vec![1, 2, 3, 4, 5]);
}

// =============================================================================
// Torn Tail Tests
// =============================================================================

#[test]
fn test_partial_header_at_end_is_torn() {
    let (_temp, path) = setup_wal(3);
    let valid_len = fs::metadata(&path).unwrap().len();
    append_raw(&path, &[0xAB; HEADER_SIZE - 4]);

    let mut reader = WalReader::open(&path).unwrap();
    let mut count = 0;
    while reader.next_entry().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
    assert_eq!(reader.torn_tail(), Some(valid_len));
}

#[test]
fn test_partial_payload_at_end_is_torn() {
    let (_temp, path) = setup_wal(3);
    let valid_len = fs::metadata(&path).unwrap().len();

    let bytes = WalEntry::new(4, put(3)).serialize().unwrap();
    append_raw(&path, &bytes[..bytes.len() - 3]);

    let mut reader = WalReader::open(&path).unwrap();
    while reader.next_entry().unwrap().is_some() {}
    assert_eq!(reader.torn_tail(), Some(valid_len));
}

#[test]
fn test_bad_crc_on_last_entry_is_torn() {
    let (_temp, path) = setup_wal(3);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    let mut count = 0;
    while reader.next_entry().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 2);
    assert!(reader.torn_tail().is_some());
}

#[test]
fn test_damaged_header_at_end_is_torn() {
    let (_temp, path) = setup_wal(3);
    let valid_len = fs::metadata(&path).unwrap().len();

    let mut bytes = WalEntry::new(4, put(3)).serialize().unwrap();
    // Length field of the unfinished entry
    bytes[9] ^= 0x40;
    append_raw(&path, &bytes);

    let mut reader = WalReader::open(&path).unwrap();
    let mut count = 0;
    while reader.next_entry().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 3);
    assert_eq!(reader.torn_tail(), Some(valid_len));
}

#[test]
fn test_zero_filled_tail_is_torn() {
    let (_temp, path) = setup_wal(2);
    let valid_len = fs::metadata(&path).unwrap().len();
    append_raw(&path, &[0u8; 64]);

    let mut reader = WalReader::open(&path).unwrap();
    while reader.next_entry().unwrap().is_some() {}
    assert_eq!(reader.torn_tail(), Some(valid_len));
}

// =============================================================================
// Corruption Tests
// =============================================================================

fn assert_first_entry_damage_is_corruption(offset: usize, mask: u8) {
    let (_temp, path) = setup_wal(3);
    let mut bytes = fs::read(&path).unwrap();
    bytes[offset] ^= mask;
    fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    let err = reader.next_entry().unwrap_err();
    assert!(matches!(err, StrataError::CorruptLog(_)), "offset {}: {:?}", offset, err);
    assert_eq!(reader.torn_tail(), None);
}

#[test]
fn test_length_grown_past_eof_in_first_entry_is_corruption() {
    // High byte of the length field: the entry now claims to run past EOF
    assert_first_entry_damage_is_corruption(11, 0x01);
}

#[test]
fn test_length_over_limit_in_first_entry_is_corruption() {
    assert_first_entry_damage_is_corruption(11, 0xF0);
}

#[test]
fn test_length_shrunk_in_first_entry_is_corruption() {
    assert_first_entry_damage_is_corruption(8, 0x01);
}

#[test]
fn test_lsn_byte_in_first_entry_is_corruption() {
    assert_first_entry_damage_is_corruption(0, 0x02);
}

#[test]
fn test_header_crc_byte_in_first_entry_is_corruption() {
    assert_first_entry_damage_is_corruption(15, 0xFF);
}

#[test]
fn test_bad_crc_in_middle_is_corruption() {
    let (_temp, path) = setup_wal(3);
    let first_len = WalEntry::new(1, put(0)).serialize().unwrap().len();

    let mut bytes = fs::read(&path).unwrap();
    bytes[first_len - 1] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    let err = reader.next_entry().unwrap_err();
    assert!(matches!(err, StrataError::CorruptLog(_)));

    // The reader stays finished after an error
    assert!(reader.next_entry().unwrap().is_none());
}

#[test]
fn test_repeated_lsn_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("wal_000001.log");

    let mut bytes = WalEntry::new(5, put(0)).serialize().unwrap();
    bytes.extend(WalEntry::new(5, put(1)).serialize().unwrap());
    fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert_eq!(reader.next_entry().unwrap().unwrap().lsn, 5);
    let err = reader.next_entry().unwrap_err();
    assert!(matches!(err, StrataError::CorruptLog(_)));
}

#[test]
fn test_decreasing_lsn_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("wal_000001.log");

    let mut bytes = WalEntry::new(10, put(0)).serialize().unwrap();
    bytes.extend(WalEntry::new(3, put(1)).serialize().unwrap());
    fs::write(&path, &bytes).unwrap();

    let results: Vec<_> = WalReader::open(&path).unwrap().entries().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(StrataError::CorruptLog(_))));
}
