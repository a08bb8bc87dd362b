//! Shared progress aggregation across concurrent downloads.
//!
//! One lock-guarded aggregator is owned by the scheduler and handed to
//! every worker; there is no ambient mutable state. The progress sink is
//! the boundary to the UI or log layer and must never block the download
//! path.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::speed::SpeedSampler;

/// Acquires a mutex, recovering the guard if a panicking thread poisoned
/// it. Counters stay meaningful either way.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Immutable view of aggregate batch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes transferred across all tasks so far.
    pub bytes_downloaded: u64,
    /// Total expected bytes for the whole batch.
    pub bytes_expected: u64,
    /// Tasks fully downloaded so far.
    pub tasks_completed: usize,
    /// Total tasks in the batch.
    pub tasks_total: usize,
    /// Sum of the active transfers' windowed throughput.
    pub throughput: u64,
}

/// Observer of download progress.
///
/// Implementations receive per-file updates and aggregate snapshots at a
/// bounded rate and must return promptly; anything slow belongs on the
/// observer's own thread.
pub trait ProgressSink: Send + Sync {
    /// One file's progress: bytes received so far out of the expected
    /// total, plus its current windowed throughput.
    fn file_progress(&self, file: &Path, received: u64, expected: u64, speed: u64);

    /// Consolidated progress for the whole batch.
    fn batch_progress(&self, snapshot: &ProgressSnapshot);
}

/// Sink that discards all progress. Used in quiet mode and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn file_progress(&self, _file: &Path, _received: u64, _expected: u64, _speed: u64) {}

    fn batch_progress(&self, _snapshot: &ProgressSnapshot) {}
}

#[derive(Debug)]
struct AggregatorState {
    bytes_downloaded: u64,
    tasks_completed: usize,
    samplers: Vec<Arc<Mutex<SpeedSampler>>>,
}

/// Lock-guarded aggregate of all workers' progress.
#[derive(Debug)]
pub struct ProgressAggregator {
    bytes_expected: u64,
    tasks_total: usize,
    state: Mutex<AggregatorState>,
}

impl ProgressAggregator {
    /// Creates an aggregator for a batch of known size.
    #[must_use]
    pub fn new(tasks_total: usize, bytes_expected: u64) -> Self {
        Self {
            bytes_expected,
            tasks_total,
            state: Mutex::new(AggregatorState {
                bytes_downloaded: 0,
                tasks_completed: 0,
                samplers: Vec::new(),
            }),
        }
    }

    /// Adds transferred bytes to the shared running total.
    pub fn add_bytes(&self, bytes: u64) {
        lock(&self.state).bytes_downloaded += bytes;
    }

    /// Subtracts bytes previously attributed to an attempt that is being
    /// redone from another mirror, so the total is not double counted.
    pub fn roll_back(&self, bytes: u64) {
        let mut state = lock(&self.state);
        state.bytes_downloaded = state.bytes_downloaded.saturating_sub(bytes);
    }

    /// Registers an active transfer's sampler for throughput summing.
    pub fn register_sampler(&self, sampler: Arc<Mutex<SpeedSampler>>) {
        lock(&self.state).samplers.push(sampler);
    }

    /// Removes a finished transfer's sampler.
    pub fn unregister_sampler(&self, sampler: &Arc<Mutex<SpeedSampler>>) {
        lock(&self.state)
            .samplers
            .retain(|candidate| !Arc::ptr_eq(candidate, sampler));
    }

    /// Marks one task fully downloaded.
    pub fn task_completed(&self) {
        lock(&self.state).tasks_completed += 1;
    }

    /// Returns a consistent snapshot of the aggregate state.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = lock(&self.state);
        let throughput = state
            .samplers
            .iter()
            .map(|sampler| lock(sampler).speed())
            .sum();
        ProgressSnapshot {
            bytes_downloaded: state.bytes_downloaded,
            bytes_expected: self.bytes_expected,
            tasks_completed: state.tasks_completed,
            tasks_total: self.tasks_total,
            throughput,
        }
    }
}
