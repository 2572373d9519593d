//! DuckDB storage backend implementation.
//!
//! Stores final records in a single table keyed by `(pk, sk)`, the layout of
//! the destination key-value store. Writes are upserts, so re-running a job
//! with the same request id overwrites its partition.
//!
//! # Configuration
//!
//! ```toml
//! [sink]
//! engine = "duckdb"
//! connection = ":memory:"  # Use ":memory:" for in-memory or file path
//! table = "group_stats"
//! batch_size = 25
//! ```
//!
//! Or via command line:
//!
//! ```bash
//! tallystream --sink-engine duckdb --sink-connection stats.db --table group_stats
//! ```

use crate::aggregation::GroupKey;
use crate::records::{create_record_batch, SinkItem};
use crate::storage::{validate_table_name, StorageBackend, StorageError, DEFAULT_TABLE};
use arrow_array::RecordBatch;
use async_trait::async_trait;
use duckdb::{params, Config, Connection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        StorageError::database(err)
    }
}

/// DuckDB-based storage backend for final records.
#[derive(Clone)]
pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl DuckDbBackend {
    /// Creates a new DuckDB backend instance.
    pub fn new(
        connection_string: &str,
        table: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        validate_table_name(table)?;

        let mut config = Config::default();
        if let Some(threads) = options.get("threads").and_then(|t| t.parse::<i64>().ok()) {
            config = config.threads(threads)?;
        }
        let conn = Connection::open_with_flags(connection_string, config)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }

    /// Creates a new DuckDB backend with an in-memory database.
    pub fn new_in_memory() -> Result<Self, StorageError> {
        Self::new(":memory:", DEFAULT_TABLE, &HashMap::new())
    }
}

#[async_trait]
impl StorageBackend for DuckDbBackend {
    async fn init(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                pk VARCHAR NOT NULL,
                sk VARCHAR NOT NULL,
                group_first VARCHAR NOT NULL,
                group_second VARCHAR NOT NULL,
                average_value DOUBLE NOT NULL,
                dominant_category VARCHAR NOT NULL,
                PRIMARY KEY (pk, sk)
            );
            "#,
            self.table
        ))
        .map_err(|e| StorageError::Database(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    async fn put_items(&self, items: Vec<SinkItem>) -> Result<(), StorageError> {
        if items.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock().await;
        conn.execute_batch("BEGIN TRANSACTION")?;

        let sql = format!(
            "INSERT OR REPLACE INTO {} \
             (pk, sk, group_first, group_second, average_value, dominant_category) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.table
        );
        let written = (|| -> Result<(), duckdb::Error> {
            let mut stmt = conn.prepare(&sql)?;
            for item in &items {
                stmt.execute(params![
                    item.partition_key,
                    item.sort_key,
                    item.group.first,
                    item.group.second,
                    item.average_value,
                    item.dominant_category,
                ])?;
            }
            Ok(())
        })();

        match written {
            Ok(()) => {
                conn.execute_batch("COMMIT")?;
                debug!(table = %self.table, items = items.len(), "Committed batch");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(StorageError::Database(format!("Failed to insert items: {}", e)))
            }
        }
    }

    async fn query_partition(&self, partition_key: &str) -> Result<RecordBatch, StorageError> {
        let query = format!(
            "SELECT pk, sk, group_first, group_second, average_value, dominant_category \
             FROM {} WHERE pk = ? ORDER BY sk ASC",
            self.table
        );

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(params![partition_key])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let first: String = row.get(2)?;
            let second: String = row.get(3)?;
            items.push(SinkItem {
                partition_key: row.get(0)?,
                sort_key: row.get(1)?,
                group: GroupKey::new(first, second),
                average_value: row.get(4)?,
                dominant_category: row.get(5)?,
            });
        }

        Ok(create_record_batch(&items)?)
    }

    fn new_with_options(
        connection_string: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let table = options
            .get("table")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TABLE);
        Self::new(connection_string, table, options)
    }
}
