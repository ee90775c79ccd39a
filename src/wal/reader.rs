//! WAL Reader
//!
//! Streams entries out of a WAL file in append order.
//!
//! A damaged entry that reaches the end of the file is a torn write from a
//! crash: iteration stops there and the offset is reported through
//! [`WalReader::torn_tail`]. A damaged entry followed by more data is
//! corruption and surfaces as [`StrataError::CorruptLog`].
//!
//! The length field is only trusted once the header CRC matches. A header
//! that fails its CRC is torn only when no intact header follows it.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};
use super::entry::{EntryHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
use super::WalEntry;

/// Reads entries from the WAL file
pub struct WalReader {
    path: PathBuf,
    reader: BufReader<File>,
    /// Offset of the next unread entry
    position: u64,
    file_len: u64,
    /// LSN of the last entry returned
    last_lsn: u64,
    /// Offset where a torn trailing entry starts, once seen
    torn_at: Option<u64>,
    /// Set after the end of the log (or an error) has been reached
    done: bool,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            position: 0,
            file_len,
            last_lsn: 0,
            torn_at: None,
            done: false,
        })
    }

    /// Read the next entry from the WAL
    ///
    /// Returns `Ok(None)` at the end of the log, including when the last
    /// entry is torn.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.done {
            return Ok(None);
        }
        match self.read_entry() {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    fn read_entry(&mut self) -> Result<Option<WalEntry>> {
        let remaining = self.file_len - self.position;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return self.torn();
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header_bytes)?;
        let header = EntryHeader::parse(&header_bytes)?;

        if !header.is_intact() {
            return if self.intact_header_follows()? {
                Err(self.corrupt("header CRC mismatch"))
            } else {
                self.torn()
            };
        }
        if header.len > MAX_PAYLOAD_SIZE {
            return Err(self.corrupt(&format!("payload length {} exceeds limit", header.len)));
        }

        let entry_end = self.position + HEADER_SIZE as u64 + header.len as u64;
        if entry_end > self.file_len {
            return self.torn();
        }

        let mut payload = vec![0u8; header.len as usize];
        self.reader.read_exact(&mut payload)?;

        let entry = match WalEntry::from_payload(&header, &payload) {
            Ok(entry) => entry,
            Err(_) if entry_end == self.file_len => return self.torn(),
            Err(e) => return Err(self.corrupt(&e.to_string())),
        };

        if entry.lsn <= self.last_lsn {
            return Err(StrataError::CorruptLog(format!(
                "non-increasing LSN {} after {} at offset {} in {}",
                entry.lsn,
                self.last_lsn,
                self.position,
                self.path.display()
            )));
        }

        self.last_lsn = entry.last_seq();
        self.position = entry_end;
        Ok(Some(entry))
    }

    fn corrupt(&self, what: &str) -> StrataError {
        StrataError::CorruptLog(format!(
            "{} at offset {} in {}",
            what,
            self.position,
            self.path.display()
        ))
    }

    /// Scan the bytes after a damaged header for a header that passes its
    /// CRC and continues the LSN sequence
    fn intact_header_follows(&mut self) -> Result<bool> {
        self.reader.seek(SeekFrom::Start(self.position + 1))?;
        let mut rest = Vec::with_capacity((self.file_len - self.position - 1) as usize);
        self.reader.read_to_end(&mut rest)?;

        if rest.len() < HEADER_SIZE {
            return Ok(false);
        }
        Ok(rest.windows(HEADER_SIZE).any(|window| {
            EntryHeader::parse(window)
                .map(|h| h.is_intact() && h.lsn > self.last_lsn && h.len <= MAX_PAYLOAD_SIZE)
                .unwrap_or(false)
        }))
    }

    fn torn(&mut self) -> Result<Option<WalEntry>> {
        tracing::warn!(
            "Torn trailing WAL entry at offset {} in {} ({} bytes)",
            self.position,
            self.path.display(),
            self.file_len - self.position
        );
        self.torn_at = Some(self.position);
        Ok(None)
    }

    /// Restart from the beginning of the file
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.position = 0;
        self.last_lsn = 0;
        self.torn_at = None;
        self.done = false;
        Ok(())
    }

    /// Offset of a torn trailing entry, if one was found
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_at
    }

    /// Offset just past the last valid entry read so far
    pub fn valid_len(&self) -> u64 {
        self.position
    }

    /// File length when the reader was opened
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator { reader: self }
    }
}

/// Iterator over WAL entries
pub struct WalIterator {
    reader: WalReader,
}

impl WalIterator {
    /// Access the underlying reader (e.g. to inspect `torn_tail`)
    pub fn reader(&self) -> &WalReader {
        &self.reader
    }
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_entry().transpose()
    }
}
