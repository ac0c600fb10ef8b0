//! objmigrate library: resumable object migration between storage providers.
//!
//! Each listed source object is downloaded through a signed URL into a
//! staging file, verified against the listed size, uploaded to the
//! destination, and then written to a record ledger so that later runs skip
//! it.  The [`runner::MigrationRunner`] fans tasks out under a shared
//! concurrency limit.

use std::sync::Arc;

use tokio::sync::Semaphore;

pub mod config;
pub mod errors;
pub mod metrics;
pub mod record;
pub mod runner;
pub mod source;
pub mod stats;
pub mod task;
pub mod transport;

use crate::record::RecordLedger;
use crate::source::{Downloader, UrlSigner};
use crate::task::TaskSettings;
use crate::transport::TransportSet;

/// Collaborators shared by every task of a run.
pub struct MigrationContext {
    /// Per-task settings taken from the configuration.
    pub settings: TaskSettings,
    /// Signs source download URLs.
    pub signer: Arc<dyn UrlSigner>,
    /// Fetches signed URLs into staging files.
    pub downloader: Arc<dyn Downloader>,
    /// Destination transports by file size.
    pub transports: TransportSet,
    /// Completed-object ledger.
    pub ledger: Arc<dyn RecordLedger>,
    /// Bounds how many tasks transfer at once.
    pub limiter: Arc<Semaphore>,
}
