//! Concurrent download execution.
//!
//! A fixed-size pool of workers drains a shared queue of download tasks,
//! aggregates bytes-transferred and throughput across all active
//! transfers, and reports consolidated progress to a sink at a bounded
//! rate. The first failing task stops the whole batch; cancellation stops
//! it cleanly without an error.

mod pool;
mod progress;
mod speed;
mod task;

pub use pool::{DownloadScheduler, SchedulerError};
pub use progress::{NullSink, ProgressAggregator, ProgressSink, ProgressSnapshot};
pub use speed::SpeedSampler;
pub use task::DownloadTask;
