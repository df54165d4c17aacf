//! In-memory destination store for tests and dry runs.

use super::{DestinationRow, DestinationStore, StoreError};
use crate::Namespace;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local [`DestinationStore`] with idempotent upsert semantics.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Namespace, HashMap<String, DestinationRow>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a logical table.
    pub fn row_count(&self, table: Namespace) -> u64 {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .map(|rows| rows.len() as u64)
            .unwrap_or(0)
    }

    /// Whether a record id is present in a table.
    pub fn contains(&self, table: Namespace, record_id: &str) -> bool {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .is_some_and(|rows| rows.contains_key(record_id))
    }

    /// Snapshot of a table's rows, in no particular order.
    pub fn rows(&self, table: Namespace) -> Vec<DestinationRow> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn load(&self, table: Namespace, rows: Vec<DestinationRow>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let target = tables.entry(table).or_default();
        let mut inserted = 0;
        for row in rows {
            let key = row.record_id.as_str().to_string();
            if target.insert(key, row).is_none() {
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
