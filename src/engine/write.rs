//! Write path
//!
//! ```text
//!   validate ─► writer lock ─► WAL append (+sync) ─► memtable apply
//!                                                      │
//!                                   size >= limit? ────┘
//!                                        │
//!                      freeze: new WAL + new memtable, queue Flush
//! ```

use std::mem;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::memtable::MemTable;
use crate::record::Record;
use crate::wal::{self, BatchOp, Operation, WalWriter};

use super::read::lookup;
use super::{
    apply_operation, BackgroundTask, Engine, EngineInner, ImmutableMemTable, MemTables, WriteBatch,
    WriterState, MAX_KEY_SIZE, MAX_VALUE_SIZE,
};

impl Engine {
    /// Put a key-value pair
    ///
    /// Returns once the mutation is in the WAL (synced, with the default
    /// `EveryWrite` strategy) and visible to readers.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;
        self.inner.write(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        Ok(())
    }

    /// Delete a key (writes a tombstone)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.inner.write(Operation::Delete { key: key.to_vec() })?;
        Ok(())
    }

    /// Apply a batch atomically: it is logged as one WAL entry, so after a
    /// crash either all of it or none of it is recovered
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    validate_key(key)?;
                    validate_value(value)?;
                }
                BatchOp::Delete { key } => validate_key(key)?,
            }
        }
        self.inner.write(Operation::Batch {
            ops: batch.into_ops(),
        })?;
        Ok(())
    }

    /// Put a key only if it holds no live value
    ///
    /// Fails with [`StrataError::KeyExists`] otherwise. The check and the
    /// write happen under the writer lock, so two racing inserts of the same
    /// key cannot both succeed.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;

        let mut writer = self.inner.writer.lock();
        self.inner.check_writable()?;
        if self.inner.current_value(key)?.is_some() {
            return Err(StrataError::KeyExists(String::from_utf8_lossy(key).into_owned()));
        }
        self.inner.write_locked(
            &mut writer,
            Operation::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )?;
        Ok(())
    }

    /// Add `delta` to the counter at `key`, returning `(old, new)`
    ///
    /// Counters are stored as decimal `i64` text. A missing key counts from
    /// zero; any other value, or a sum that overflows, is rejected.
    pub fn increment(&self, key: &[u8], delta: i64) -> Result<(i64, i64)> {
        validate_key(key)?;

        let mut writer = self.inner.writer.lock();
        self.inner.check_writable()?;
        let old = match self.inner.current_value(key)? {
            Some(bytes) => parse_counter(key, &bytes)?,
            None => 0,
        };
        let new = old.checked_add(delta).ok_or_else(|| {
            StrataError::InvalidArgument(format!(
                "counter {} overflows: {} + {}",
                String::from_utf8_lossy(key),
                old,
                delta
            ))
        })?;
        self.inner.write_locked(
            &mut writer,
            Operation::Put {
                key: key.to_vec(),
                value: new.to_string().into_bytes(),
            },
        )?;
        Ok((old, new))
    }
}

impl EngineInner {
    /// Log and apply one operation. Returns its first sequence number.
    pub(crate) fn write(&self, operation: Operation) -> Result<u64> {
        let mut writer = self.writer.lock();
        self.write_locked(&mut writer, operation)
    }

    /// Log and apply one operation with the writer lock already held
    fn write_locked(&self, writer: &mut WriterState, operation: Operation) -> Result<u64> {
        self.check_writable()?;

        let seq = writer
            .wal
            .append(&operation)
            .map_err(|e| self.log_failure(writer, e))?;
        let active = Arc::clone(&self.memtables.read().active);
        let size = apply_operation(&active, seq, operation, 0);

        if size >= self.config.memtable_size_limit {
            self.freeze(writer)?;
        }
        Ok(seq)
    }

    /// Live value of `key`; with the writer lock held nothing can change it
    fn current_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let memtables = self.memtables();
        let version = self.levels.current();
        Ok(lookup(&memtables, &version, key)?.and_then(Record::into_value))
    }

    /// Swap in an empty memtable backed by a new WAL and queue the old one
    /// for flushing. Called with the writer lock held.
    ///
    /// Stalls while `max_immutable_memtables` frozen tables are waiting.
    /// Returns false if the active memtable was empty.
    pub(crate) fn freeze(&self, writer: &mut WriterState) -> Result<bool> {
        if self.memtables().active.is_empty() {
            return Ok(false);
        }

        while self.memtables().immutable.len() >= self.config.max_immutable_memtables {
            self.check_writable()?;
            tracing::debug!("Write stall: {} memtables waiting for flush", self.memtables().immutable.len());
            self.schedule(BackgroundTask::Flush);
            self.wait_for_work();
        }

        let new_log_id = self.levels.new_file_id();
        let new_wal = WalWriter::open_at(
            &wal::wal_path(&self.wal_dir, new_log_id),
            self.config.wal_sync_strategy,
            writer.wal.current_lsn(),
        )?;
        writer.wal.sync().map_err(|e| self.log_failure(writer, e))?;
        let old_log_id = mem::replace(&mut writer.log_id, new_log_id);
        writer.wal = new_wal;

        {
            let mut memtables = self.memtables.write();
            let mut immutable = Vec::with_capacity(memtables.immutable.len() + 1);
            immutable.push(ImmutableMemTable {
                memtable: Arc::clone(&memtables.active),
                log_id: old_log_id,
            });
            immutable.extend(memtables.immutable.iter().cloned());
            *memtables = Arc::new(MemTables {
                active: Arc::new(MemTable::new()),
                immutable,
            });
        }

        tracing::debug!("Froze memtable (WAL {}), now logging to WAL {}", old_log_id, new_log_id);
        self.schedule(BackgroundTask::Flush);
        Ok(true)
    }

    /// A poisoned WAL makes the engine read-only until it is reopened.
    ///
    /// The failed entry may still be replayed on the next open, so the
    /// outcome of the write that hit the error is unknown to the caller.
    fn log_failure(&self, writer: &WriterState, e: StrataError) -> StrataError {
        if writer.wal.is_poisoned() {
            let mut background_error = self.background_error.lock();
            if background_error.is_none() {
                tracing::error!("WAL failure, refusing further writes: {}", e);
                *background_error = Some(format!("WAL write failed: {}", e));
            }
        }
        e
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StrataError::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StrataError::InvalidArgument(format!(
            "key is {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

fn parse_counter(key: &[u8], value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| {
            StrataError::InvalidArgument(format!(
                "value of {} is not a counter",
                String::from_utf8_lossy(key)
            ))
        })
}

fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(StrataError::InvalidArgument(format!(
            "value is {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}
