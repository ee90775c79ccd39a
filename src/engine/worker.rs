//! Background worker
//!
//! One thread per engine, fed by a channel:
//!
//! ```text
//!   writer ──Flush──►┐
//!   open   ──Compact─┤   ┌──────────────┐
//!   close  ──Shutdown┴──►│  strata-bg   │──► flush oldest frozen memtable
//!                        │  (loop)      │──► compact while needed
//!                        └──────────────┘
//! ```
//!
//! Failed jobs are retried with exponential backoff. Once retries run out the
//! error is recorded and writes are refused from then on.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::error::{Result, StrataError};
use crate::wal;

use super::{BackgroundTask, EngineInner};

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) fn spawn(inner: Arc<EngineInner>, tasks: Receiver<BackgroundTask>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("strata-bg".into())
        .spawn(move || run(inner, tasks))?;
    Ok(handle)
}

fn run(inner: Arc<EngineInner>, tasks: Receiver<BackgroundTask>) {
    tracing::debug!("Background worker started");
    while let Ok(task) = tasks.recv() {
        match task {
            BackgroundTask::Shutdown => break,
            BackgroundTask::Flush => {
                if inner.run_job("flush", || inner.flush_frozen()) && inner.config.background_compaction {
                    inner.run_job("compaction", || inner.compact_levels());
                }
            }
            BackgroundTask::Compact => {
                inner.run_job("compaction", || inner.compact_levels());
            }
        }
        inner.notify_work_done();
    }
    inner.notify_work_done();
    tracing::debug!("Background worker stopped");
}

impl EngineInner {
    /// Run a job with retries. Returns true if it succeeded.
    fn run_job<T>(&self, name: &str, mut job: impl FnMut() -> Result<T>) -> bool {
        if self.background_error.lock().is_some() {
            return false;
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match job() {
                Ok(_) => return true,
                Err(StrataError::Cancelled(what)) => {
                    tracing::info!("Background {} cancelled: {}", name, what);
                    return false;
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_background_retries && !self.is_shutting_down() => {
                    attempt += 1;
                    tracing::warn!(
                        "Background {} failed (attempt {}/{}), retrying in {:?}: {}",
                        name,
                        attempt,
                        self.config.max_background_retries,
                        backoff,
                        e
                    );
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(e) => {
                    tracing::error!("Background {} failed: {}", name, e);
                    *self.background_error.lock() = Some(format!("{} failed: {}", name, e));
                    return false;
                }
            }
        }
    }

    /// Flush frozen memtables, oldest first, until none is left
    fn flush_frozen(&self) -> Result<usize> {
        let mut flushed = 0;
        while let Some(oldest) = self.memtables().immutable.last().cloned() {
            // Every later memtable is backed by a WAL with a larger id
            let log_number = oldest.log_id + 1;
            self.levels
                .flush_memtable(&oldest.memtable, log_number, oldest.memtable.max_sequence())?;
            self.flushes.fetch_add(1, Ordering::Relaxed);

            // Only now that the table is visible can readers stop seeing the memtable
            {
                let mut memtables = self.memtables.write();
                let mut next = (**memtables).clone();
                next.immutable.retain(|m| !Arc::ptr_eq(&m.memtable, &oldest.memtable));
                *memtables = Arc::new(next);
            }

            if let Err(e) = wal::remove_obsolete(&self.wal_dir, log_number) {
                tracing::warn!("Failed to remove obsolete WAL files: {}", e);
            }
            flushed += 1;
            self.notify_work_done();
        }
        Ok(flushed)
    }

    fn compact_levels(&self) -> Result<usize> {
        let count = self.levels.run_compactions(&self.shutdown)?;
        self.compactions.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }
}
