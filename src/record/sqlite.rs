//! SQLite-backed record ledger.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{MigrationRecord, RecordLedger, StoredRecord};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Ledger backed by a single SQLite database file.
pub struct SqliteLedger {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.apply_pragmas()?;
        ledger.init_db()?;
        Ok(ledger)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the tables if they do not already exist. Safe on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS migration_records (
                record_key    TEXT PRIMARY KEY,
                kind          TEXT NOT NULL,
                bucket        TEXT NOT NULL,
                dest_path     TEXT NOT NULL,
                etag          TEXT NOT NULL,
                size          INTEGER NOT NULL,
                completed_at  TEXT NOT NULL
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_rfc3339()],
            )?;
        }

        Ok(())
    }

    /// Number of completed records.
    pub fn count(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM migration_records", [], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    }

    /// All records, oldest first.
    pub fn list(&self) -> anyhow::Result<Vec<StoredRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT record_key, kind, bucket, dest_path, etag, size, completed_at
             FROM migration_records ORDER BY completed_at, record_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredRecord {
                record_key: row.get(0)?,
                kind: row.get(1)?,
                bucket: row.get(2)?,
                dest_path: row.get(3)?,
                etag: row.get(4)?,
                size: row.get::<_, i64>(5)? as u64,
                completed_at: row.get(6)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

impl RecordLedger for SqliteLedger {
    fn exists(
        &self,
        record_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let record_key = record_key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM migration_records WHERE record_key = ?1",
                    params![record_key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn insert(
        &self,
        record: &MigrationRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let record = record.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // Records are never mutated: a duplicate insert keeps the first row.
            conn.execute(
                "INSERT OR IGNORE INTO migration_records
                    (record_key, kind, bucket, dest_path, etag, size, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.key(),
                    record.kind.as_str(),
                    record.bucket,
                    record.dest_path,
                    record.etag,
                    record.size as i64,
                    now_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
