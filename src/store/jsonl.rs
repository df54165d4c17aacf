//! Newline-delimited JSON destination store.
//!
//! One append-only `.jsonl` file per logical table. Existing record ids are
//! indexed at open so re-delivered rows are skipped, preserving the
//! idempotent-upsert contract across process restarts.

use super::{DestinationRow, DestinationStore, StoreError};
use crate::Namespace;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

/// File-backed [`DestinationStore`] writing one NDJSON file per table.
pub struct JsonlStore {
    dir: PathBuf,
    seen: Mutex<HashMap<Namespace, HashSet<String>>>,
}

impl JsonlStore {
    /// Open (or create) a store rooted at `dir`, indexing any rows already
    /// present so duplicates are skipped on re-delivery.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let mut seen = HashMap::new();
        for table in Namespace::all() {
            let ids = index_existing(&table_path(&dir, table))?;
            if !ids.is_empty() {
                debug!(%table, existing = ids.len(), "Indexed existing destination rows");
            }
            seen.insert(table, ids);
        }

        Ok(Self {
            dir,
            seen: Mutex::new(seen),
        })
    }

    /// Path of a table's NDJSON file.
    pub fn table_file(&self, table: Namespace) -> PathBuf {
        table_path(&self.dir, table)
    }
}

fn table_path(dir: &Path, table: Namespace) -> PathBuf {
    match table {
        Namespace::Transaction => dir.join("raw_transaction_events.jsonl"),
        Namespace::Prediction => dir.join("raw_prediction_events.jsonl"),
    }
}

fn index_existing(path: &Path) -> Result<HashSet<String>, StoreError> {
    let mut ids = HashSet::new();
    if !path.exists() {
        return Ok(ids);
    }
    let reader = BufReader::new(std::fs::File::open(path).map_err(io_err)?);
    for line in reader.lines() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DestinationRow>(&line) {
            Ok(row) => {
                ids.insert(row.record_id.as_str().to_string());
            }
            Err(e) => {
                // A torn trailing line from a crash is tolerable; the row
                // will be re-delivered and re-appended.
                warn!(path = %path.display(), error = %e, "Skipping unreadable destination row");
            }
        }
    }
    Ok(ids)
}

#[async_trait]
impl DestinationStore for JsonlStore {
    async fn load(&self, table: Namespace, rows: Vec<DestinationRow>) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let table_seen = seen.entry(table).or_default();

        let path = self.table_file(table);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let mut inserted = 0u64;
        for row in rows {
            if table_seen.contains(row.record_id.as_str()) {
                continue;
            }
            let line =
                serde_json::to_string(&row).map_err(|e| StoreError::Rejected(e.to_string()))?;
            file.write_all(line.as_bytes()).map_err(io_err)?;
            file.write_all(b"\n").map_err(io_err)?;
            table_seen.insert(row.record_id.as_str().to_string());
            inserted += 1;
        }
        file.flush().map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        info!(%table, inserted, path = %path.display(), "Loaded rows into destination table");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UniqueRecordId;
    use serde_json::json;

    fn row(id: &str) -> DestinationRow {
        DestinationRow::new(
            UniqueRecordId::from_parts(id, "cust", "2024-06-15T00:00:00+00:00"),
            json!({"transaction_id": id, "amount": 10}),
        )
    }

    #[tokio::test]
    async fn test_load_appends_and_dedups() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        let inserted = store
            .load(Namespace::Transaction, vec![row("a"), row("b"), row("a")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let inserted = store.load(Namespace::Transaction, vec![row("b")]).await.unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn test_dedup_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.load(Namespace::Transaction, vec![row("a")]).await.unwrap();
        }

        // Fresh process: the existing file is re-indexed at open
        let store = JsonlStore::open(dir.path()).unwrap();
        let inserted = store
            .load(Namespace::Transaction, vec![row("a"), row("c")])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let contents = std::fs::read_to_string(store.table_file(Namespace::Transaction)).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_tables_write_to_separate_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        store.load(Namespace::Transaction, vec![row("a")]).await.unwrap();
        store.load(Namespace::Prediction, vec![row("p")]).await.unwrap();

        assert!(store.table_file(Namespace::Transaction).exists());
        assert!(store.table_file(Namespace::Prediction).exists());
    }
}
