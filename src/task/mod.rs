//! Per-object migration tasks.
//!
//! A [`migrate::MigrationTask`] moves exactly one source object to the
//! destination and reports what happened as a [`TaskOutcome`].  Nothing in
//! this module touches the run counters; the runner does that from the
//! outcome.

pub mod migrate;
pub mod staging;

use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::errors::MigrateError;
use crate::record::MigrateKind;

pub use migrate::{build_dest_path, MigrationTask};
pub use staging::StagingFile;

/// Where a task is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    CheckRecord,
    SignUrl,
    Download,
    Verify,
    Upload,
    Record,
    Done,
    Skipped,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Init => "init",
            TaskState::CheckRecord => "check_record",
            TaskState::SignUrl => "sign_url",
            TaskState::Download => "download",
            TaskState::Verify => "verify",
            TaskState::Upload => "upload",
            TaskState::Record => "record",
            TaskState::Done => "done",
            TaskState::Skipped => "skipped",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Uploaded and recorded.
    Done { record_key: String, bytes: u64 },
    /// Already recorded by an earlier run.
    Skipped { record_key: String },
    /// Stopped in `stage`; nothing was recorded.
    Failed {
        record_key: String,
        stage: TaskState,
        error: MigrateError,
    },
}

impl TaskOutcome {
    pub fn record_key(&self) -> &str {
        match self {
            TaskOutcome::Done { record_key, .. }
            | TaskOutcome::Skipped { record_key }
            | TaskOutcome::Failed { record_key, .. } => record_key,
        }
    }

    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Done { .. } => TaskState::Done,
            TaskOutcome::Skipped { .. } => TaskState::Skipped,
            TaskOutcome::Failed { .. } => TaskState::Failed,
        }
    }
}

/// The slice of configuration a task reads.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub kind: MigrateKind,
    pub dest_bucket: String,
    pub dest_prefix: String,
    pub src_prefix: String,
    pub src_endpoint: String,
    pub temp_folder: PathBuf,
    pub storage_class: String,
    pub attach_md5: bool,
}

impl TaskSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            kind: config.migrate.kind,
            dest_bucket: config.destination.bucket.clone(),
            dest_prefix: config.destination.prefix.clone(),
            src_prefix: config.source.prefix.clone(),
            src_endpoint: config.source.endpoint.clone(),
            temp_folder: config.migrate.temp_folder.clone(),
            storage_class: config.destination.storage_class.clone(),
            attach_md5: config.destination.attach_md5,
        }
    }
}
