//! Record types and the abstract ledger trait.
//!
//! Ledger methods use manual desugaring with pinned futures so the trait
//! stays object safe and can sit behind `Arc<dyn RecordLedger>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Discriminates which source integration produced a record, so that keys
/// from different integrations never collide in a shared ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MigrateKind {
    /// Private bucket served through signed download URLs.
    #[default]
    Qiniu,
}

impl MigrateKind {
    /// Tag written into record keys. Never change an existing value.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrateKind::Qiniu => "migrateQiniu",
        }
    }
}

impl fmt::Display for MigrateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "This exact object has been migrated."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Source integration.
    pub kind: MigrateKind,
    /// Destination bucket.
    pub bucket: String,
    /// Destination object path.
    pub dest_path: String,
    /// Integrity tag reported by the source listing.
    pub etag: String,
    /// Size in bytes reported by the source listing.
    pub size: u64,
}

impl MigrationRecord {
    pub fn new(
        kind: MigrateKind,
        bucket: impl Into<String>,
        dest_path: impl Into<String>,
        etag: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            kind,
            bucket: bucket.into(),
            dest_path: dest_path.into(),
            etag: etag.into(),
            size,
        }
    }

    /// Composite ledger key.
    ///
    /// A pure function of the five identity fields: it must stay byte-for-byte
    /// stable across releases or every existing ledger is invalidated.
    pub fn key(&self) -> String {
        format!(
            "[kind: {}] [bucket: {}] [path: {}] [etag: {}] [size: {}]",
            self.kind, self.bucket, self.dest_path, self.etag, self.size
        )
    }
}

/// A ledger row as persisted, for inspection and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_key: String,
    pub kind: String,
    pub bucket: String,
    pub dest_path: String,
    pub etag: String,
    pub size: u64,
    /// RFC 3339 timestamp of the insert.
    pub completed_at: String,
}

/// Async ledger contract.
///
/// Implementations must tolerate concurrent lookups and inserts from many
/// tasks.  Inserting a key that already exists is a no-op.
pub trait RecordLedger: Send + Sync + 'static {
    /// Check whether `record_key` has been recorded.
    fn exists(
        &self,
        record_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;

    /// Persist `record` as completed.
    fn insert(
        &self,
        record: &MigrationRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;
}
