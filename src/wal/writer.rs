//! WAL Writer
//!
//! Handles appending entries to the WAL file.
//!
//! A failed write, flush or fsync poisons the writer: the file may hold a
//! partial or unsynced entry, so every later append is refused rather than
//! risk reusing its LSN.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, StrataError};
use super::entry;
use super::{Operation, WalRecovery};

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// LSN the next appended entry receives
    next_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries written since the last fsync
    uncommitted: usize,
    /// Current file size in bytes
    size: u64,
    /// Message of the I/O failure that poisoned this writer
    poisoned: Option<String>,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl WalWriter {
    /// Open or create a WAL file
    ///
    /// An existing file is scanned so numbering continues after its last
    /// entry; a torn tail is left for recovery to deal with.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let next_lsn = if path.exists() {
            WalRecovery::verify(path)?.last_lsn + 1
        } else {
            1
        };
        Self::open_at(path, sync_strategy, next_lsn)
    }

    /// Open or create a WAL file whose next entry gets `next_lsn`
    pub fn open_at(path: &Path, sync_strategy: WalSyncStrategy, next_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_lsn: next_lsn.max(1),
            sync_strategy,
            uncommitted: 0,
            size,
            poisoned: None,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append an operation to the WAL, returning the LSN assigned to it
    ///
    /// Batches consume one LSN per mutation; the returned LSN is the first.
    pub fn append(&mut self, operation: &Operation) -> Result<u64> {
        let count = operation.seq_count();
        if count == 0 {
            return Err(StrataError::InvalidArgument("empty batch".into()));
        }

        self.check_poisoned()?;

        let lsn = self.next_lsn;
        let bytes = entry::encode(lsn, operation, entry::now_millis())?;

        // Reserved before any I/O: once bytes may have reached the file the
        // LSN is spent, whether or not the append succeeds.
        self.next_lsn = lsn + count;

        let written = self
            .writer
            .write_all(&bytes)
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            return Err(self.poison(e));
        }
        self.size += bytes.len() as u64;
        self.uncommitted += 1;

        let should_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.uncommitted >= count,
        };
        if should_sync {
            self.sync()?;
        }

        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.check_poisoned()?;
        let synced = self
            .writer
            .flush()
            .and_then(|()| self.sync_file());
        if let Err(e) = synced {
            return Err(self.poison(e));
        }
        self.uncommitted = 0;
        Ok(())
    }

    #[cfg(not(test))]
    fn sync_file(&mut self) -> std::io::Result<()> {
        self.writer.get_ref().sync_data()
    }

    #[cfg(test)]
    fn sync_file(&mut self) -> std::io::Result<()> {
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected fsync failure"));
        }
        self.writer.get_ref().sync_data()
    }

    /// Make the next fsync fail
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    fn poison(&mut self, e: std::io::Error) -> StrataError {
        tracing::error!("WAL {} poisoned: {}", self.path.display(), e);
        self.poisoned = Some(e.to_string());
        StrataError::Io(e)
    }

    fn check_poisoned(&self) -> Result<()> {
        match &self.poisoned {
            Some(msg) => Err(StrataError::Background(format!(
                "WAL {} unusable after earlier failure: {}",
                self.path.display(),
                msg
            ))),
            None => Ok(()),
        }
    }

    /// Whether an earlier I/O failure left this writer unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Discard every entry (numbering continues)
    pub fn truncate(&mut self) -> Result<()> {
        self.check_poisoned()?;
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.size = 0;
        self.uncommitted = 0;
        Ok(())
    }

    /// Get the LSN the next entry will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Entries appended but not yet fsynced
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
