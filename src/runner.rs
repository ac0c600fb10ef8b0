//! Drives a migration run: one task per listed object, bounded concurrency,
//! one summary at the end.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::source::manifest::{ManifestError, ManifestReader};
use crate::source::SourceObjectRef;
use crate::stats::{StatsSnapshot, TaskStats};
use crate::task::{MigrationTask, TaskOutcome};
use crate::MigrationContext;

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    /// Manifest lines that could not be parsed and were not submitted.
    pub malformed: u64,
    /// Failed tasks that may succeed when the run is repeated.
    pub retryable: u64,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.stats.fail > 0 || self.malformed > 0
    }
}

/// Submits tasks and waits for all of them.
///
/// Entries are pulled from the input lazily and at most `max_in_flight`
/// tasks exist at any time; the context's semaphore then decides how many
/// of those transfer at once.
pub struct MigrationRunner {
    ctx: Arc<MigrationContext>,
    stats: TaskStats,
    max_in_flight: usize,
}

impl MigrationRunner {
    /// The in-flight cap defaults to twice the limiter's permits, so skip
    /// checks can run ahead of the transfers without unbounded growth.
    pub fn new(ctx: Arc<MigrationContext>) -> Self {
        let max_in_flight = ctx.limiter.available_permits().saturating_mul(2).max(1);
        Self {
            ctx,
            stats: TaskStats::new(),
            max_in_flight,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Run every entry of a manifest. Malformed lines are logged and counted.
    pub async fn run_manifest<I>(&self, entries: I) -> RunSummary
    where
        I: IntoIterator<Item = Result<SourceObjectRef, ManifestError>>,
    {
        self.drive(entries).await
    }

    /// Convenience wrapper over [`ManifestReader::open`].
    pub async fn run_manifest_file(&self, path: &std::path::Path) -> anyhow::Result<RunSummary> {
        let reader = ManifestReader::open(path)?;
        Ok(self.run_manifest(reader).await)
    }

    /// Migrate `objects`, returning once every task has finished.
    pub async fn run_objects<I>(&self, objects: I) -> RunSummary
    where
        I: IntoIterator<Item = SourceObjectRef>,
    {
        self.drive(objects.into_iter().map(Ok)).await
    }

    async fn drive<I>(&self, entries: I) -> RunSummary
    where
        I: IntoIterator<Item = Result<SourceObjectRef, ManifestError>>,
    {
        let mut malformed = 0u64;
        let mut retryable = 0u64;
        let mut submitted = 0u64;
        let mut tasks = JoinSet::new();

        for entry in entries {
            let object = match entry {
                Ok(object) => object,
                Err(e) => {
                    warn!(error = %e, "Skipping manifest entry");
                    malformed += 1;
                    continue;
                }
            };

            while tasks.len() >= self.max_in_flight {
                match tasks.join_next().await {
                    Some(joined) => retryable += self.reap(joined),
                    None => break,
                }
            }

            let task = MigrationTask::new(Arc::clone(&self.ctx), object);
            tasks.spawn(task.run());
            submitted += 1;
        }
        debug!(submitted, "All migration tasks submitted");

        while let Some(joined) = tasks.join_next().await {
            retryable += self.reap(joined);
        }

        let stats = self.stats.snapshot();
        info!(
            submitted,
            success = stats.success,
            fail = stats.fail,
            skip = stats.skip,
            bytes = stats.bytes,
            "Migration run finished"
        );
        RunSummary {
            stats,
            malformed,
            retryable,
        }
    }

    /// Count one joined task. Returns 1 for a failure worth retrying.
    fn reap(&self, joined: Result<TaskOutcome, tokio::task::JoinError>) -> u64 {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                // A panicking task never produced an outcome; count it here.
                error!(error = %e, "Migration task aborted");
                self.stats.add_fail();
                return 0;
            }
        };
        self.stats.record(&outcome);
        debug!(key = %outcome.record_key(), state = %outcome.state(), "Task finished");
        match &outcome {
            TaskOutcome::Failed { error, .. } if error.is_retryable() => 1,
            _ => 0,
        }
    }
}
