//! Migration record ledger.
//!
//! The ledger remembers which (kind, bucket, path, etag, size) combinations
//! have already been copied so that re-runs skip them.  The
//! [`store::RecordLedger`] trait defines the interface;
//! [`sqlite::SqliteLedger`] is the durable implementation.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use store::{MigrateKind, MigrationRecord, RecordLedger};
