//! Run counters and resume checkpoint.
//!
//! Workers record into [`RunState`] through atomics; the progress reporter
//! only ever reads snapshots, so reports never slow the scan down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkReport, Mutation, Outcome};

/// Point-in-time copy of the run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Volume entries processed.
    pub scanned: u64,
    /// Chunks filtered out by policy.
    pub skipped: u64,
    /// Chunks whose record matches the volume.
    pub ok: u64,
    /// Chunks unknown to the metadata service.
    pub missing: u64,
    /// Chunks whose record differs from the volume.
    pub divergent: u64,
    /// Records inserted.
    pub inserted: u64,
    /// Records updated.
    pub updated: u64,
    /// Entries that could not be checked or acted upon.
    pub failed: u64,
    /// Seconds since the run started.
    pub elapsed_secs: u64,
    /// Last volume path such that every entry up to it is done.
    pub checkpoint: Option<PathBuf>,
}

impl RunSnapshot {
    /// Processing rate in entries per second.
    pub fn rate(&self) -> f64 {
        if self.elapsed_secs == 0 {
            self.scanned as f64
        } else {
            self.scanned as f64 / self.elapsed_secs as f64
        }
    }
}

#[derive(Default)]
struct CheckpointInner {
    in_flight: BTreeMap<u64, PathBuf>,
    done: BTreeMap<u64, PathBuf>,
    watermark: Option<PathBuf>,
}

/// Tracks the highest contiguous completed entry in dispatch order.
///
/// Entries complete out of order on the worker pool; the watermark only
/// advances past an entry once every entry dispatched before it is done.
#[derive(Default)]
pub struct Checkpoint {
    inner: Mutex<CheckpointInner>,
}

impl Checkpoint {
    /// Records that entry `seq` was dispatched.
    pub fn begin(&self, seq: u64, path: &Path) {
        self.inner.lock().in_flight.insert(seq, path.to_path_buf());
    }

    /// Records that entry `seq` completed and advances the watermark.
    pub fn finish(&self, seq: u64) {
        let mut inner = self.inner.lock();
        let Some(path) = inner.in_flight.remove(&seq) else {
            return;
        };
        inner.done.insert(seq, path);
        let low = inner.in_flight.keys().next().copied();
        while let Some(entry) = inner.done.first_entry() {
            if low.is_some_and(|low| *entry.key() > low) {
                break;
            }
            let path = entry.remove();
            inner.watermark = Some(path);
        }
    }

    /// Current resume marker.
    pub fn marker(&self) -> Option<PathBuf> {
        self.inner.lock().watermark.clone()
    }
}

/// Live counters of a reconciliation run.
pub struct RunState {
    scanned: AtomicU64,
    skipped: AtomicU64,
    ok: AtomicU64,
    missing: AtomicU64,
    divergent: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    failed: AtomicU64,
    started: Instant,
    checkpoint: Checkpoint,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Creates zeroed counters; the run clock starts now.
    pub fn new() -> Self {
        Self {
            scanned: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            ok: AtomicU64::new(0),
            missing: AtomicU64::new(0),
            divergent: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            updated: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started: Instant::now(),
            checkpoint: Checkpoint::default(),
        }
    }

    /// Resume checkpoint of this run.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Accounts for one processed entry.
    pub fn record(&self, report: &ChunkReport) {
        self.scanned.fetch_add(1, Ordering::Relaxed);
        let counter = match report.outcome {
            Outcome::Present => &self.ok,
            Outcome::Missing => &self.missing,
            Outcome::Divergent => &self.divergent,
            Outcome::Skipped => &self.skipped,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        match report.mutation {
            Mutation::Inserted => {
                self.inserted.fetch_add(1, Ordering::Relaxed);
            }
            Mutation::Updated => {
                self.updated.fetch_add(1, Ordering::Relaxed);
            }
            Mutation::None => {}
        }
    }

    /// Takes a snapshot of the counters.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            scanned: self.scanned.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            divergent: self.divergent.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed_secs: self.started.elapsed().as_secs(),
            checkpoint: self.checkpoint.marker(),
        }
    }
}
