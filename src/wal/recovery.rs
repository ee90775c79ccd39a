//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;
use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Last valid LSN (0 if the log is empty)
    pub last_lsn: u64,

    /// Whether a torn trailing entry was found (and, for `recover`, removed)
    pub was_truncated: bool,

    /// Bytes belonging to the torn trailing entry
    pub bytes_truncated: u64,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Fail with `CorruptLog` on damage that is not at the tail
    /// 3. Truncate a partial write at the end
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut entries = Vec::new();
        let result = Self::replay(path, |entry| {
            entries.push(entry);
            Ok(())
        })?;
        Ok((entries, result))
    }

    /// Stream every valid entry into `apply`, then truncate a torn tail
    pub fn replay<F>(path: &Path, mut apply: F) -> Result<RecoveryResult>
    where
        F: FnMut(WalEntry) -> Result<()>,
    {
        let mut reader = WalReader::open(path)?;
        let mut result = RecoveryResult::default();

        while let Some(entry) = reader.next_entry()? {
            result.entries_recovered += 1;
            result.last_lsn = entry.last_seq();
            apply(entry)?;
        }

        if let Some(offset) = reader.torn_tail() {
            result.was_truncated = true;
            result.bytes_truncated = reader.file_len() - offset;

            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(offset)?;
            file.sync_all()?;
            tracing::warn!(
                "Truncated {} bytes of torn WAL tail from {}",
                result.bytes_truncated,
                path.display()
            );
        }

        Ok(result)
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let mut reader = WalReader::open(path)?;
        let mut result = RecoveryResult::default();

        while let Some(entry) = reader.next_entry()? {
            result.entries_recovered += 1;
            result.last_lsn = entry.last_seq();
        }

        if let Some(offset) = reader.torn_tail() {
            result.was_truncated = true;
            result.bytes_truncated = reader.file_len() - offset;
        }

        Ok(result)
    }
}
