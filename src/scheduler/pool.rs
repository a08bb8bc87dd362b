//! Worker pool draining a shared download queue.
//!
//! All tasks are queued up front; each worker atomically pops one task,
//! executes it end to end through the mirror client (which supplies per-URL
//! retries and source fallback), and repeats until the queue is empty.
//! The first non-cancellation error cancels the shared token, the other
//! workers stop at their next suspension point, and the captured error is
//! re-raised once every worker has stopped.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::progress::{ProgressAggregator, ProgressSink, lock};
use super::speed::SpeedSampler;
use super::task::DownloadTask;
use crate::fetch::{FetchError, MirrorClient};

/// Trailing window for per-transfer throughput sampling.
const SPEED_WINDOW: Duration = Duration::from_millis(3000);

/// Minimum interval between progress reports for one task.
const REPORT_INTERVAL: Duration = Duration::from_millis(400);

/// Error type for a scheduler batch run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A task failed on every mirror; carries the last fetch error.
    #[error("download of {path} failed: {source}")]
    Task {
        /// Destination path of the failed task.
        path: PathBuf,
        /// The underlying fetch error.
        #[source]
        source: FetchError,
    },

    /// The batch was cancelled from outside before completing.
    #[error("download batch cancelled")]
    Cancelled,
}

/// Fixed-size worker pool executing a batch of download tasks.
#[derive(Debug)]
pub struct DownloadScheduler {
    client: Arc<MirrorClient>,
    workers: usize,
    cancel: CancellationToken,
}

impl DownloadScheduler {
    /// Creates a scheduler with the given worker count (clamped to at
    /// least one) and cancellation token.
    #[must_use]
    pub fn new(client: Arc<MirrorClient>, workers: usize, cancel: CancellationToken) -> Self {
        Self {
            client,
            workers: workers.max(1),
            cancel,
        }
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Executes every task in the batch with bounded parallelism.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Task`] re-raising the first worker
    /// failure after all workers have stopped, or
    /// [`SchedulerError::Cancelled`] if the shared token fired externally.
    #[instrument(skip(self, tasks, sink), fields(tasks = tasks.len(), workers = self.workers))]
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<(), SchedulerError> {
        let tasks_total = tasks.len();
        let bytes_expected = tasks.iter().map(|task| task.expected_len).sum();
        let aggregator = Arc::new(ProgressAggregator::new(tasks_total, bytes_expected));
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let first_error: Arc<Mutex<Option<SchedulerError>>> = Arc::new(Mutex::new(None));

        info!(tasks_total, bytes_expected, "starting download batch");

        let mut handles = Vec::new();
        for worker_id in 0..self.workers {
            let client = Arc::clone(&self.client);
            let queue = Arc::clone(&queue);
            let aggregator = Arc::clone(&aggregator);
            let sink = Arc::clone(&sink);
            let first_error = Arc::clone(&first_error);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(
                    worker_id,
                    &client,
                    &queue,
                    &aggregator,
                    sink.as_ref(),
                    &cancel,
                    &first_error,
                )
                .await;
            }));
        }

        for handle in handles {
            // A panicking worker must not take down the batch accounting.
            if let Err(join_error) = handle.await {
                warn!(error = %join_error, "download worker panicked");
            }
        }

        if let Some(error) = lock(&first_error).take() {
            return Err(error);
        }
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let snapshot = aggregator.snapshot();
        info!(
            tasks_completed = snapshot.tasks_completed,
            bytes_downloaded = snapshot.bytes_downloaded,
            "download batch complete"
        );
        Ok(())
    }
}

/// Pops the next task, or `None` when the queue is drained.
fn pop_task(queue: &Mutex<VecDeque<DownloadTask>>) -> Option<DownloadTask> {
    lock(queue).pop_front()
}

async fn worker_loop(
    worker_id: usize,
    client: &MirrorClient,
    queue: &Mutex<VecDeque<DownloadTask>>,
    aggregator: &ProgressAggregator,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
    first_error: &Mutex<Option<SchedulerError>>,
) {
    loop {
        if cancel.is_cancelled() {
            debug!(worker_id, "worker stopping on cancellation");
            return;
        }

        let Some(task) = pop_task(queue) else {
            debug!(worker_id, "queue drained, worker exiting");
            return;
        };

        let result = tokio::select! {
            () = cancel.cancelled() => {
                debug!(worker_id, "worker interrupted mid-task");
                return;
            }
            result = execute_task(client, &task, aggregator, sink) => result,
        };

        match result {
            Ok(()) => {
                aggregator.task_completed();
                sink.batch_progress(&aggregator.snapshot());
                let snapshot = aggregator.snapshot();
                debug!(
                    worker_id,
                    completed = snapshot.tasks_completed,
                    total = snapshot.tasks_total,
                    file = %task.dest.display(),
                    "task downloaded"
                );
            }
            Err(error) => {
                warn!(worker_id, file = %task.dest.display(), %error, "task failed, stopping batch");
                let mut slot = lock(first_error);
                if slot.is_none() {
                    *slot = Some(SchedulerError::Task {
                        path: task.dest.clone(),
                        source: error,
                    });
                }
                drop(slot);
                cancel.cancel();
                return;
            }
        }
    }
}

/// Runs one task end to end, feeding the shared aggregator and throttled
/// sink reports.
async fn execute_task(
    client: &MirrorClient,
    task: &DownloadTask,
    aggregator: &ProgressAggregator,
    sink: &dyn ProgressSink,
) -> Result<(), FetchError> {
    let sampler = Arc::new(Mutex::new(SpeedSampler::new(SPEED_WINDOW)));
    aggregator.register_sampler(Arc::clone(&sampler));

    // Bytes attributed to the attempt currently in flight; rolled back out
    // of the shared total when the client falls back to another mirror.
    let attempt_bytes = AtomicU64::new(0);
    let last_report: Mutex<Option<Instant>> = Mutex::new(None);

    let result = client
        .download_file_multiple(
            &task.urls,
            &task.dest,
            task.expected_len,
            |chunk, received, expected| {
                aggregator.add_bytes(chunk);
                attempt_bytes.fetch_add(chunk, Ordering::Relaxed);
                lock(&sampler).feed(chunk);

                let now = Instant::now();
                let mut last = lock(&last_report);
                let due = last
                    .is_none_or(|previous| now.duration_since(previous) >= REPORT_INTERVAL);
                if due {
                    *last = Some(now);
                    drop(last);
                    sink.file_progress(&task.dest, received, expected, lock(&sampler).speed());
                    sink.batch_progress(&aggregator.snapshot());
                }
            },
            || {
                aggregator.roll_back(attempt_bytes.swap(0, Ordering::Relaxed));
            },
        )
        .await;

    aggregator.unregister_sampler(&sampler);
    result
}
