//! Run-wide task counters.

use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::{BYTES_UPLOADED_TOTAL, FAILURES_TOTAL, OBJECTS_TOTAL};
use crate::task::TaskOutcome;

/// Success/fail/skip counters shared by every task of a run.
///
/// Each finished task bumps exactly one counter, so the three always add up
/// to the number of tasks that have finished.
#[derive(Debug, Default)]
pub struct TaskStats {
    success: AtomicU64,
    fail: AtomicU64,
    skip: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of [`TaskStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub success: u64,
    pub fail: u64,
    pub skip: u64,
    pub bytes: u64,
}

impl StatsSnapshot {
    pub fn total(&self) -> u64 {
        self.success + self.fail + self.skip
    }
}

impl TaskStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fail(&self) {
        self.fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skip(&self) {
        self.skip.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one finished task and emit the matching metrics.
    pub fn record(&self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Done { bytes, .. } => {
                self.add_success();
                self.bytes.fetch_add(*bytes, Ordering::Relaxed);
                counter!(OBJECTS_TOTAL, "result" => "done").increment(1);
                counter!(BYTES_UPLOADED_TOTAL).increment(*bytes);
            }
            TaskOutcome::Skipped { .. } => {
                self.add_skip();
                counter!(OBJECTS_TOTAL, "result" => "skipped").increment(1);
            }
            TaskOutcome::Failed { stage, error, .. } => {
                self.add_fail();
                counter!(OBJECTS_TOTAL, "result" => "failed").increment(1);
                counter!(FAILURES_TOTAL, "stage" => stage.as_str(), "kind" => error.kind())
                    .increment(1);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success: self.success.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
            skip: self.skip.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}
