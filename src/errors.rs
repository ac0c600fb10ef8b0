//! Migration error types.
//!
//! Every variant belongs to one class of the failure taxonomy: a bad
//! configuration, a transient transfer failure, an integrity violation on
//! the staged copy, or a ledger failure.  Tasks never propagate these to
//! their caller; they are carried inside a [`crate::task::TaskOutcome`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while migrating a single object.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Credentials or endpoint settings are unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The source download failed or the source answered with a non-success status.
    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    /// The staging file disappeared between download and upload.
    #[error("staging file {} does not exist", path.display())]
    MissingStagingFile { path: PathBuf },

    /// The staged copy does not match the size reported by the source listing.
    #[error("download size[{actual}] != list size[{expected}]")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The destination transport rejected the upload.
    #[error("upload failed: {0:#}")]
    Upload(anyhow::Error),

    /// The record ledger could not be queried or written.
    #[error("record ledger error: {0:#}")]
    Persistence(anyhow::Error),
}

impl MigrateError {
    /// Short, stable label for the failure class (used in logs and metrics).
    pub fn kind(&self) -> &'static str {
        match self {
            MigrateError::Configuration { .. } => "configuration",
            MigrateError::Download { .. } | MigrateError::Upload(_) => "transient_io",
            MigrateError::MissingStagingFile { .. } | MigrateError::SizeMismatch { .. } => {
                "integrity"
            }
            MigrateError::Persistence(_) => "persistence",
        }
    }

    /// Whether resubmitting the same task may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MigrateError::Configuration { .. })
    }
}
