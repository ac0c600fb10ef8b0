//! In-memory record ledger.
//!
//! Keeps records in a `RwLock<HashSet>` with no persistence. Useful for
//! testing and for throwaway runs where resumability is not wanted.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{MigrationRecord, RecordLedger};

#[derive(Debug, Default)]
pub struct MemoryLedger {
    keys: RwLock<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordLedger for MemoryLedger {
    fn exists(
        &self,
        record_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let record_key = record_key.to_string();
        Box::pin(async move {
            let keys = self.keys.read().expect("rwlock poisoned");
            Ok(keys.contains(&record_key))
        })
    }

    fn insert(
        &self,
        record: &MigrationRecord,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let key = record.key();
        Box::pin(async move {
            let mut keys = self.keys.write().expect("rwlock poisoned");
            keys.insert(key);
            Ok(())
        })
    }
}
