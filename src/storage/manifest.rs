//! Manifest
//!
//! Durable record of the level layout: which tables belong to which level,
//! the oldest WAL still needed, and the file id / sequence counters.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬──────────┬───────────┬──────────────────┐
//! │ "SMAN" (4)│ Version (4) │ Len (8)  │ CRC32 (4) │ bincode(State)   │
//! └───────────┴─────────────┴──────────┴───────────┴──────────────────┘
//! ```
//!
//! Every change rewrites the whole file: write `MANIFEST.tmp`, fsync,
//! rename over `MANIFEST`, fsync the directory. A crash leaves either the
//! old or the new manifest, never a mix.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

use super::sstable::TableMeta;

const MAGIC: &[u8; 4] = b"SMAN";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;

pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Everything the manifest persists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestState {
    /// Next unused file id (shared by WAL and SSTable files)
    pub next_file_id: u64,
    /// WAL files with id below this are fully persisted in SSTables
    pub log_number: u64,
    /// Highest sequence number persisted in SSTables
    pub last_sequence: u64,
    pub levels: Vec<Vec<TableMeta>>,
}

impl ManifestState {
    fn empty(num_levels: usize) -> Self {
        Self {
            next_file_id: 1,
            log_number: 0,
            last_sequence: 0,
            levels: vec![Vec::new(); num_levels],
        }
    }

    pub fn table_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Apply an edit, checking that it is consistent with this state
    pub fn apply(&self, edit: &ManifestEdit) -> Result<Self> {
        let mut next = self.clone();

        let live: HashSet<u64> = self.levels.iter().flatten().map(|t| t.id).collect();
        for id in &edit.removed {
            if !live.contains(id) {
                return Err(StrataError::InvariantViolation(format!(
                    "manifest edit removes unknown table {}",
                    id
                )));
            }
        }
        for level in next.levels.iter_mut() {
            level.retain(|t| !edit.removed.contains(&t.id));
        }

        for (level, meta) in &edit.added {
            if live.contains(&meta.id) && !edit.removed.contains(&meta.id) {
                return Err(StrataError::InvariantViolation(format!(
                    "manifest edit adds table {} twice",
                    meta.id
                )));
            }
            let tables = next.levels.get_mut(*level).ok_or_else(|| {
                StrataError::InvariantViolation(format!("manifest edit targets missing level {}", level))
            })?;
            tables.push(meta.clone());
            next.next_file_id = next.next_file_id.max(meta.id + 1);
        }

        if let Some(log_number) = edit.log_number {
            if log_number < next.log_number {
                return Err(StrataError::InvariantViolation(format!(
                    "log number moved backwards: {} -> {}",
                    next.log_number, log_number
                )));
            }
            next.log_number = log_number;
        }
        if let Some(seq) = edit.last_sequence {
            next.last_sequence = next.last_sequence.max(seq);
        }
        if let Some(id) = edit.next_file_id {
            next.next_file_id = next.next_file_id.max(id);
        }

        Ok(next)
    }
}

/// A change to the layout, committed as one manifest rewrite
#[derive(Debug, Clone, Default)]
pub struct ManifestEdit {
    /// (level, table) pairs to add
    pub added: Vec<(usize, TableMeta)>,
    /// Table ids to remove
    pub removed: HashSet<u64>,
    pub log_number: Option<u64>,
    pub last_sequence: Option<u64>,
    pub next_file_id: Option<u64>,
}

impl ManifestEdit {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.log_number.is_none()
            && self.last_sequence.is_none()
            && self.next_file_id.is_none()
    }
}

/// The on-disk manifest and its in-memory copy
#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    state: ManifestState,
}

impl Manifest {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).is_file()
    }

    /// Write a fresh, empty manifest
    pub fn create(dir: &Path, num_levels: usize) -> Result<Self> {
        let manifest = Self {
            dir: dir.to_path_buf(),
            state: ManifestState::empty(num_levels),
        };
        manifest.commit(&manifest.state)?;
        tracing::info!("Created manifest in {}", dir.display());
        Ok(manifest)
    }

    /// Load the manifest, padding it out to `num_levels` levels
    pub fn load(dir: &Path, num_levels: usize) -> Result<Self> {
        let path = Self::path(dir);
        let bytes = fs::read(&path)?;
        let mut state = decode(&bytes, &path)?;

        if state.levels.len() > num_levels {
            let deepest_used = state
                .levels
                .iter()
                .rposition(|l| !l.is_empty())
                .unwrap_or(0);
            if deepest_used >= num_levels {
                return Err(StrataError::Config(format!(
                    "database has tables at L{}, but num_levels is {}",
                    deepest_used, num_levels
                )));
            }
            state.levels.truncate(num_levels);
        }
        state.levels.resize(num_levels, Vec::new());

        Ok(Self {
            dir: dir.to_path_buf(),
            state,
        })
    }

    pub fn state(&self) -> &ManifestState {
        &self.state
    }

    /// Durably apply an edit. The in-memory state changes only once the new
    /// file is in place.
    pub fn apply(&mut self, edit: &ManifestEdit) -> Result<()> {
        let next = self.state.apply(edit)?;
        self.commit(&next)?;
        self.state = next;
        Ok(())
    }

    fn commit(&self, state: &ManifestState) -> Result<()> {
        let payload = bincode::serialize(state)
            .map_err(|e| StrataError::Serialization(format!("manifest: {}", e)))?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);

        let path = Self::path(&self.dir);
        let tmp_path = self.dir.join(format!("{}.tmp", MANIFEST_FILENAME));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        sync_dir(&self.dir)?;
        Ok(())
    }
}

fn decode(bytes: &[u8], path: &Path) -> Result<ManifestState> {
    let corrupt = |what: String| StrataError::CorruptManifest(format!("{}: {}", path.display(), what));

    if bytes.len() < HEADER_SIZE {
        return Err(corrupt(format!("file too small ({} bytes)", bytes.len())));
    }
    if &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(word);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported version {}", version)));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let len = u64::from_le_bytes(len_bytes) as usize;
    word.copy_from_slice(&bytes[16..20]);
    let crc = u32::from_le_bytes(word);

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != len {
        return Err(corrupt(format!("payload is {} bytes, header says {}", payload.len(), len)));
    }
    if crc32fast::hash(payload) != crc {
        return Err(corrupt("checksum mismatch".into()));
    }

    bincode::deserialize(payload).map_err(|e| corrupt(format!("decode: {}", e)))
}

/// Make a rename in `dir` durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
