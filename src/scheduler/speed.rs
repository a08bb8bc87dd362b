//! Sliding-window throughput estimation for a single transfer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Per-transfer throughput estimator over a trailing time window.
///
/// Purely for display; never used for correctness or flow control.
#[derive(Debug)]
pub struct SpeedSampler {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedSampler {
    /// Creates a sampler with the given trailing window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Records `bytes` transferred at the current time and discards
    /// samples that have fallen out of the window.
    pub fn feed(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        while let Some((instant, _)) = self.samples.front() {
            if now.duration_since(*instant) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the total bytes fed within the trailing window.
    #[must_use]
    pub fn speed(&self) -> u64 {
        let now = Instant::now();
        self.samples
            .iter()
            .filter(|(instant, _)| now.duration_since(*instant) <= self.window)
            .map(|(_, bytes)| bytes)
            .sum()
    }
}
