//! Compaction
//!
//! Picks the level most in need of compaction and merges its tables into the
//! level below.
//!
//! ## Scoring
//! ```text
//!   L0:  table_count / l0_compaction_trigger
//!   Ln:  level_bytes / (level_base_bytes * fanout^(n-1))
//! ```
//! The highest score >= 1.0 wins. The last level is never an input.
//!
//! ## Inputs
//! - L0: every L0 table plus the L1 tables overlapping their combined range
//! - Ln: one table, chosen round-robin through the key space, plus the
//!   overlapping L(n+1) tables
//!
//! A single input with nothing overlapping below is moved by a manifest
//! edit, without rewriting the file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Result, StrataError};

use super::merge::{MergeIterator, RecordIter};
use super::sstable::{sstable_path, SSTableBuilder, SSTableReader, TableMeta, TableOptions};
use super::version::Version;

/// How often (in records) a running merge checks for cancellation
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// A compaction chosen by `pick_compaction`
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub level: usize,
    pub output_level: usize,
    pub score: f64,
    /// Tables taken from `level` (newest first for L0)
    pub inputs: Vec<Arc<SSTableReader>>,
    /// Tables of `output_level` overlapping the inputs
    pub overlapping: Vec<Arc<SSTableReader>>,
}

impl CompactionTask {
    pub fn is_trivial_move(&self) -> bool {
        self.inputs.len() == 1 && self.overlapping.is_empty()
    }

    pub fn input_ids(&self) -> Vec<u64> {
        self.inputs
            .iter()
            .chain(self.overlapping.iter())
            .map(|t| t.id())
            .collect()
    }

    pub fn input_bytes(&self) -> u64 {
        self.inputs
            .iter()
            .chain(self.overlapping.iter())
            .map(|t| t.file_size())
            .sum()
    }

    /// Summary line for logs
    pub fn describe(&self) -> String {
        let (min, max) = self.key_range();
        format!(
            "L{} -> L{} (score {:.2}): {} + {} tables, keys {:?}..{:?}",
            self.level,
            self.output_level,
            self.score,
            self.inputs.len(),
            self.overlapping.len(),
            String::from_utf8_lossy(&min),
            String::from_utf8_lossy(&max)
        )
    }

    /// Smallest and largest key across the `level` inputs
    fn key_range(&self) -> (Vec<u8>, Vec<u8>) {
        key_range(&self.inputs)
    }
}

/// Outcome of one compaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub level: usize,
    pub output_level: usize,
    pub input_tables: usize,
    pub output_tables: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub records_written: u64,
    pub tombstones_dropped: u64,
    pub trivial_move: bool,
}

/// Score of one level; >= 1.0 means it needs compaction
pub fn level_score(version: &Version, config: &Config, level: usize) -> f64 {
    if level == 0 {
        version.level(0).len() as f64 / config.l0_compaction_trigger as f64
    } else {
        version.level_bytes(level) as f64 / config.max_bytes_for_level(level) as f64
    }
}

/// Choose the next compaction, if any level is over budget
///
/// `pointers[n]` is the largest key compacted out of Ln last time.
pub fn pick_compaction(version: &Version, config: &Config, pointers: &[Vec<u8>]) -> Option<CompactionTask> {
    let last_input_level = version.num_levels().checked_sub(1)?;

    let (level, score) = (0..last_input_level)
        .map(|level| (level, level_score(version, config, level)))
        .filter(|(_, score)| *score >= 1.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))?;

    let inputs: Vec<Arc<SSTableReader>> = if level == 0 {
        version.level(0).to_vec()
    } else {
        let tables = version.level(level);
        let pointer = pointers.get(level).map(|p| p.as_slice()).unwrap_or(&[]);
        let next = tables
            .iter()
            .find(|t| pointer.is_empty() || t.min_key() > pointer)
            .or_else(|| tables.first())?;
        vec![Arc::clone(next)]
    };
    if inputs.is_empty() {
        return None;
    }

    let (min, max) = key_range(&inputs);
    let overlapping = version.overlapping(level + 1, &min, &max);

    Some(CompactionTask {
        level,
        output_level: level + 1,
        score,
        inputs,
        overlapping,
    })
}

fn key_range(tables: &[Arc<SSTableReader>]) -> (Vec<u8>, Vec<u8>) {
    let min = tables.iter().map(|t| t.min_key()).min().unwrap_or(&[]);
    let max = tables.iter().map(|t| t.max_key()).max().unwrap_or(&[]);
    (min.to_vec(), max.to_vec())
}

/// Tables written by a merge, plus what the merge did
pub(crate) struct MergeOutput {
    pub tables: Vec<TableMeta>,
    pub records_written: u64,
    pub tombstones_dropped: u64,
}

/// Merge the task's inputs into new tables for the output level
///
/// Output is split whenever a table reaches `target_file_size`. On error or
/// cancellation every table written so far is deleted.
pub(crate) fn merge_tables(
    task: &CompactionTask,
    version: &Version,
    sst_dir: &Path,
    options: TableOptions,
    target_file_size: u64,
    new_file_id: &dyn Fn() -> u64,
    cancel: &AtomicBool,
) -> Result<MergeOutput> {
    let mut written: Vec<TableMeta> = Vec::new();
    match merge_into(task, version, sst_dir, options, target_file_size, new_file_id, cancel, &mut written) {
        Ok((records_written, tombstones_dropped)) => Ok(MergeOutput {
            tables: written,
            records_written,
            tombstones_dropped,
        }),
        Err(e) => {
            for meta in &written {
                let path = sstable_path(sst_dir, meta.id);
                if let Err(rm) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to remove abandoned output {}: {}", path.display(), rm);
                }
            }
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn merge_into(
    task: &CompactionTask,
    version: &Version,
    sst_dir: &Path,
    options: TableOptions,
    target_file_size: u64,
    new_file_id: &dyn Fn() -> u64,
    cancel: &AtomicBool,
    written: &mut Vec<TableMeta>,
) -> Result<(u64, u64)> {
    // Newer data first: the input level, then the level below
    let sources: Vec<RecordIter<'static>> = task
        .inputs
        .iter()
        .chain(task.overlapping.iter())
        .map(|t| Box::new(t.iter()) as RecordIter<'static>)
        .collect();
    let merge = MergeIterator::new(sources);

    let mut builder: Option<SSTableBuilder> = None;
    let mut records_written = 0u64;
    let mut tombstones_dropped = 0u64;
    let mut seen = 0u64;

    for item in merge {
        let (key, record) = item?;

        seen += 1;
        if seen % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Acquire) {
            return Err(StrataError::Cancelled(format!(
                "compaction L{} -> L{}",
                task.level, task.output_level
            )));
        }

        if record.is_tombstone() && !version.overlaps_below(task.output_level, &key) {
            tombstones_dropped += 1;
            continue;
        }

        if builder.is_none() {
            let id = new_file_id();
            builder = Some(SSTableBuilder::new(&sstable_path(sst_dir, id), id, options)?);
        }
        if let Some(b) = builder.as_mut() {
            b.add(&key, &record)?;
            records_written += 1;
            if b.estimated_file_size() >= target_file_size {
                if let Some(full) = builder.take() {
                    written.push(full.finish()?);
                }
            }
        }
    }

    if cancel.load(Ordering::Acquire) {
        return Err(StrataError::Cancelled(format!(
            "compaction L{} -> L{}",
            task.level, task.output_level
        )));
    }
    if let Some(last) = builder.take() {
        written.push(last.finish()?);
    }

    Ok((records_written, tombstones_dropped))
}
