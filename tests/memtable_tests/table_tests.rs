//! MemTable Tests
//!
//! Tests verify:
//! - Basic put/get/delete with sequence numbers
//! - Older sequence numbers never overwrite newer ones
//! - Size tracking and the flush trigger
//! - Sorted iteration, including from a start bound
//! - Batch application and single-lock multi-key reads
//! - Concurrent readers alongside a writer

use std::ops::Bound;
use std::sync::Arc;
use std::thread;

use stratadb::memtable::{MemTable, MemTableEntry, Record, ENTRY_OVERHEAD};

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_memtable_is_empty() {
    let memtable = MemTable::new();
    assert_eq!(memtable.entry_count(), 0);
    assert_eq!(memtable.approximate_size(), 0);
    assert_eq!(memtable.max_sequence(), 0);
    assert!(memtable.is_empty());
}

#[test]
fn test_put_and_get() {
    let memtable = MemTable::new();
    memtable.put(b"key1".to_vec(), b"value1".to_vec(), 1);

    let record = memtable.get(b"key1").unwrap();
    assert_eq!(record.seq, 1);
    assert_eq!(record.entry, MemTableEntry::Value(b"value1".to_vec()));
}

#[test]
fn test_get_nonexistent_key() {
    let memtable = MemTable::new();
    assert_eq!(memtable.get(b"nonexistent"), None);
}

#[test]
fn test_put_overwrites_with_newer_seq() {
    let memtable = MemTable::new();
    memtable.put(b"key".to_vec(), b"old".to_vec(), 1);
    memtable.put(b"key".to_vec(), b"new".to_vec(), 2);

    assert_eq!(memtable.entry_count(), 1);
    assert_eq!(memtable.get(b"key").unwrap().as_value(), Some(&b"new"[..]));
}

#[test]
fn test_older_seq_is_ignored() {
    let memtable = MemTable::new();
    memtable.put(b"key".to_vec(), b"new".to_vec(), 10);
    memtable.put(b"key".to_vec(), b"stale".to_vec(), 4);

    let record = memtable.get(b"key").unwrap();
    assert_eq!(record.seq, 10);
    assert_eq!(record.as_value(), Some(&b"new"[..]));
    assert_eq!(memtable.max_sequence(), 10);
}

// =============================================================================
// Tombstone Tests
// =============================================================================

#[test]
fn test_delete_leaves_tombstone() {
    let memtable = MemTable::new();
    memtable.put(b"key".to_vec(), b"value".to_vec(), 1);
    memtable.delete(b"key".to_vec(), 2);

    let record = memtable.get(b"key").unwrap();
    assert!(record.is_tombstone());
    assert_eq!(record.seq, 2);
    assert_eq!(memtable.entry_count(), 1);
}

#[test]
fn test_delete_of_absent_key_is_recorded() {
    let memtable = MemTable::new();
    memtable.delete(b"ghost".to_vec(), 1);
    assert_eq!(memtable.get(b"ghost"), Some(Record::tombstone(1)));
    assert!(!memtable.is_empty());
}

#[test]
fn test_put_after_delete_revives_key() {
    let memtable = MemTable::new();
    memtable.delete(b"key".to_vec(), 1);
    memtable.put(b"key".to_vec(), b"back".to_vec(), 2);
    assert_eq!(memtable.get(b"key").unwrap().into_value(), Some(b"back".to_vec()));
}

// =============================================================================
// Size Tracking Tests
// =============================================================================

#[test]
fn test_size_counts_key_value_and_overhead() {
    let memtable = MemTable::new();
    let size = memtable.put(b"abc".to_vec(), b"12345".to_vec(), 1);
    assert_eq!(size, ENTRY_OVERHEAD + 3 + 5);
    assert_eq!(memtable.approximate_size(), size);
}

#[test]
fn test_size_follows_value_changes() {
    let memtable = MemTable::new();
    memtable.put(b"k".to_vec(), vec![0; 100], 1);
    memtable.put(b"k".to_vec(), vec![0; 10], 2);
    assert_eq!(memtable.approximate_size(), ENTRY_OVERHEAD + 1 + 10);

    memtable.delete(b"k".to_vec(), 3);
    assert_eq!(memtable.approximate_size(), ENTRY_OVERHEAD + 1);
}

#[test]
fn test_should_flush_at_limit() {
    let memtable = MemTable::new();
    let limit = 4 * (ENTRY_OVERHEAD + 4 + 4);
    for i in 0..3u64 {
        memtable.put(format!("k{:03}", i).into_bytes(), b"vvvv".to_vec(), i + 1);
    }
    assert!(!memtable.should_flush(limit));

    memtable.put(b"k003".to_vec(), b"vvvv".to_vec(), 4);
    assert!(memtable.should_flush(limit));
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[test]
fn test_iter_is_sorted() {
    let memtable = MemTable::new();
    for (seq, key) in ["delta", "alpha", "charlie", "bravo"].iter().enumerate() {
        memtable.put(key.as_bytes().to_vec(), b"v".to_vec(), seq as u64 + 1);
    }

    let keys: Vec<Vec<u8>> = memtable.iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec![
            b"alpha".to_vec(),
            b"bravo".to_vec(),
            b"charlie".to_vec(),
            b"delta".to_vec()
        ]
    );
}

#[test]
fn test_iter_includes_tombstones() {
    let memtable = MemTable::new();
    memtable.put(b"a".to_vec(), b"1".to_vec(), 1);
    memtable.delete(b"b".to_vec(), 2);

    let records: Vec<(Vec<u8>, Record)> = memtable.iter().collect();
    assert_eq!(records.len(), 2);
    assert!(records[1].1.is_tombstone());
}

#[test]
fn test_range_from_bounds() {
    let memtable = MemTable::new();
    for i in 0..10u64 {
        memtable.put(format!("key{}", i).into_bytes(), b"v".to_vec(), i + 1);
    }

    let included: Vec<Vec<u8>> = memtable
        .range_from(Bound::Included(b"key5".to_vec()))
        .map(|(k, _)| k)
        .collect();
    assert_eq!(included.len(), 5);
    assert_eq!(included[0], b"key5".to_vec());

    let excluded: Vec<Vec<u8>> = memtable
        .range_from(Bound::Excluded(b"key5".to_vec()))
        .map(|(k, _)| k)
        .collect();
    assert_eq!(excluded.len(), 4);
    assert_eq!(excluded[0], b"key6".to_vec());
}

#[test]
fn test_iterator_sees_keys_inserted_ahead() {
    let memtable = MemTable::new();
    memtable.put(b"a".to_vec(), b"1".to_vec(), 1);
    memtable.put(b"c".to_vec(), b"3".to_vec(), 2);

    let mut iter = memtable.iter();
    assert_eq!(iter.next().unwrap().0, b"a".to_vec());

    // Iteration does not hold the lock between steps
    memtable.put(b"b".to_vec(), b"2".to_vec(), 3);
    assert_eq!(iter.next().unwrap().0, b"b".to_vec());
    assert_eq!(iter.next().unwrap().0, b"c".to_vec());
    assert!(iter.next().is_none());
}

// =============================================================================
// Batch and Snapshot Tests
// =============================================================================

#[test]
fn test_apply_batch_applies_every_record() {
    let memtable = MemTable::new();
    memtable.put(b"b".to_vec(), b"old".to_vec(), 1);

    let size = memtable.apply_batch(vec![
        (b"a".to_vec(), Record::value(2, b"1".to_vec())),
        (b"b".to_vec(), Record::tombstone(3)),
        (b"c".to_vec(), Record::value(4, b"3".to_vec())),
    ]);

    assert_eq!(size, memtable.approximate_size());
    assert_eq!(memtable.entry_count(), 3);
    assert_eq!(memtable.max_sequence(), 4);
    assert_eq!(memtable.get(b"b").unwrap().entry, MemTableEntry::Tombstone);
}

#[test]
fn test_apply_batch_keeps_newer_records() {
    let memtable = MemTable::new();
    memtable.put(b"a".to_vec(), b"new".to_vec(), 10);
    memtable.apply_batch(vec![(b"a".to_vec(), Record::value(5, b"stale".to_vec()))]);
    assert_eq!(memtable.get(b"a").unwrap().seq, 10);
}

#[test]
fn test_get_many() {
    let memtable = MemTable::new();
    memtable.put(b"a".to_vec(), b"1".to_vec(), 1);
    memtable.delete(b"b".to_vec(), 2);

    let found = memtable.get_many(&[b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
    assert_eq!(found[0].as_ref().unwrap().entry, MemTableEntry::Value(b"1".to_vec()));
    assert_eq!(found[1].as_ref().unwrap().entry, MemTableEntry::Tombstone);
    assert!(found[2].is_none());
}

#[test]
fn test_snapshot_from_is_detached() {
    let memtable = MemTable::new();
    for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
        memtable.put(key.as_bytes().to_vec(), b"v".to_vec(), i as u64 + 1);
    }

    let snapshot = memtable.snapshot_from(b"b");
    memtable.put(b"bb".to_vec(), b"late".to_vec(), 10);

    let keys: Vec<Vec<u8>> = snapshot.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers_with_writer() {
    let memtable = Arc::new(MemTable::new());
    for i in 0..100u64 {
        memtable.put(format!("key{:03}", i).into_bytes(), b"initial".to_vec(), i + 1);
    }

    let writer = {
        let memtable = Arc::clone(&memtable);
        thread::spawn(move || {
            for i in 0..100u64 {
                memtable.put(format!("key{:03}", i).into_bytes(), b"updated".to_vec(), 1000 + i);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let memtable = Arc::clone(&memtable);
            thread::spawn(move || {
                for i in 0..100 {
                    let record = memtable.get(format!("key{:03}", i).as_bytes()).unwrap();
                    let value = record.into_value().unwrap();
                    assert!(value == b"initial" || value == b"updated");
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(memtable.entry_count(), 100);
    assert_eq!(memtable.max_sequence(), 1099);
}
