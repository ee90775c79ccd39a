//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append log entries before any mutation
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Crash recovery and replay
//!
//! ## File Format
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Entry 1                                                    │
//! │ ┌─────────┬─────────┬──────────────┬──────────────┬──────┐ │
//! │ │ LSN (8) │ Len (4) │ Hdr CRC (4)  │ Data CRC (4) │ Data │ │
//! │ └─────────┴─────────┴──────────────┴──────────────┴──────┘ │
//! ├────────────────────────────────────────────────────────────┤
//! │ Entry 2 ...                                                │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Files
//! Each memtable is backed by its own log, `wal_{id:06}.log`. A log becomes
//! garbage once the manifest's log number moves past its id.

mod entry;
mod writer;
mod reader;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use entry::{BatchOp, WalEntry, Operation, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use writer::WalWriter;
pub use reader::{WalIterator, WalReader};
pub use recovery::{WalRecovery, RecoveryResult};

/// Path of the log file with the given id
pub fn wal_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal_{:06}.log", id))
}

/// "wal_000042.log" → Some(42)
pub fn parse_wal_id(path: &Path) -> Option<u64> {
    if path.extension()? != "log" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    name.strip_prefix("wal_")?.parse().ok()
}

/// All log files in `dir`, oldest first
pub fn list_wal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut logs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_wal_id(&path) {
                logs.push((id, path));
            }
        }
    }
    logs.sort_by_key(|(id, _)| *id);
    Ok(logs)
}

/// Delete every log with id < `log_number`
pub fn remove_obsolete(dir: &Path, log_number: u64) -> Result<usize> {
    let mut removed = 0;
    for (id, path) in list_wal_files(dir)? {
        if id < log_number {
            fs::remove_file(&path)?;
            tracing::debug!("Removed obsolete WAL {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}
