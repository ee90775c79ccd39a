//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Header size: LSN (8) + Len (4) + Header CRC (4) + Payload CRC (4) = 20 bytes
pub const HEADER_SIZE: usize = 20;

/// Largest payload a single entry may carry (256 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - sequence number of the (first) mutation
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Several mutations applied atomically; mutation `i` gets `lsn + i`
    Batch { ops: Vec<BatchOp> },
}

/// A mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Operation {
    /// How many sequence numbers this operation consumes
    pub fn seq_count(&self) -> u64 {
        match self {
            Operation::Put { .. } | Operation::Delete { .. } => 1,
            Operation::Batch { ops } => ops.len() as u64,
        }
    }
}

impl WalEntry {
    /// Create an entry stamped with the current wall-clock time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        Self {
            lsn,
            operation,
            timestamp: now_millis(),
        }
    }

    /// Sequence number of the last mutation in this entry
    pub fn last_seq(&self) -> u64 {
        self.lsn + self.operation.seq_count().saturating_sub(1)
    }

    /// Encode as `[lsn u64][len u32][header_crc u32][payload_crc u32][payload]`.
    ///
    /// The header CRC covers the lsn and the length, so a damaged length is
    /// never trusted to locate the next entry.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode(self.lsn, &self.operation, self.timestamp)
    }

    /// Decode one entry from the start of `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = EntryHeader::parse(bytes)?;
        if !header.is_intact() {
            return Err(StrataError::CorruptLog(format!(
                "header CRC mismatch for entry lsn={}",
                header.lsn
            )));
        }
        let end = HEADER_SIZE + header.len as usize;
        if bytes.len() < end {
            return Err(StrataError::CorruptLog(format!(
                "truncated entry: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }
        Self::from_payload(&header, &bytes[HEADER_SIZE..end])
    }

    /// Decode the payload that follows an already parsed header
    pub(crate) fn from_payload(header: &EntryHeader, payload: &[u8]) -> Result<Self> {
        if crc32fast::hash(payload) != header.payload_crc {
            return Err(StrataError::CorruptLog(format!(
                "payload CRC mismatch for entry lsn={}",
                header.lsn
            )));
        }

        let (operation, timestamp): (Operation, u64) = bincode::deserialize(payload)
            .map_err(|e| StrataError::CorruptLog(format!("undecodable entry lsn={}: {}", header.lsn, e)))?;

        Ok(Self {
            lsn: header.lsn,
            operation,
            timestamp,
        })
    }
}

/// Frame an operation without taking ownership of it
pub(crate) fn encode(lsn: u64, operation: &Operation, timestamp: u64) -> Result<Vec<u8>> {
    let payload = bincode::serialize(&(operation, timestamp))
        .map_err(|e| StrataError::Serialization(format!("WAL entry: {}", e)))?;

    if payload.len() > MAX_PAYLOAD_SIZE as usize {
        return Err(StrataError::InvalidArgument(format!(
            "WAL entry too large: {} bytes (max {})",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }
    let len = payload.len() as u32;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&lsn.to_le_bytes());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&header_checksum(lsn, len).to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Wall-clock time in unix millis
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Fixed-size frame header preceding every payload
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryHeader {
    pub lsn: u64,
    pub len: u32,
    pub header_crc: u32,
    pub payload_crc: u32,
}

impl EntryHeader {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StrataError::CorruptLog(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            lsn: u64::from_le_bytes(le_array(&bytes[0..8])),
            len: u32::from_le_bytes(le_array(&bytes[8..12])),
            header_crc: u32::from_le_bytes(le_array(&bytes[12..16])),
            payload_crc: u32::from_le_bytes(le_array(&bytes[16..20])),
        })
    }

    /// Whether the lsn and length match the header CRC
    pub(crate) fn is_intact(&self) -> bool {
        header_checksum(self.lsn, self.len) == self.header_crc
    }
}

fn header_checksum(lsn: u64, len: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.finalize()
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
