//! Storage backends for the destination key-value store.
//!
//! Final records are stored under a partition key (the job's request id) and
//! a sort key derived from the group. This module provides:
//! - `duckdb`: embedded DuckDB table keyed by `(pk, sk)`
//! - `memory`: ordered in-memory map, for dry runs and tests
//!
//! Each backend implements the `StorageBackend` trait, providing a consistent
//! interface for batched writes and partition reads.

pub mod duckdb;
pub mod memory;

use crate::config::SinkConfig;
use crate::records::SinkItem;
use arrow_array::RecordBatch;
use arrow_schema::ArrowError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use self::duckdb::DuckDbBackend;
pub use self::memory::InMemoryBackend;

/// Default destination table.
pub const DEFAULT_TABLE: &str = "group_stats";

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Table names are interpolated into SQL and must be plain identifiers
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// No backend exists for the configured engine
    #[error("Unsupported storage engine: {0}")]
    UnsupportedEngine(String),

    /// Arrow conversion failed
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl StorageError {
    /// Create a database error
    pub fn database<E: std::fmt::Display>(err: E) -> Self {
        Self::Database(err.to_string())
    }
}

/// Storage backend trait for final record persistence.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Initialize the storage backend.
    async fn init(&self) -> Result<(), StorageError>;

    /// Upsert one batch of items, keyed by `(partition_key, sort_key)`.
    async fn put_items(&self, items: Vec<SinkItem>) -> Result<(), StorageError>;

    /// Read every item of a partition, ordered by sort key.
    async fn query_partition(&self, partition_key: &str) -> Result<RecordBatch, StorageError>;

    /// Create a new instance with the given options.
    /// The connection string and options are backend-specific.
    fn new_with_options(
        connection_string: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError>
    where
        Self: Sized;
}

/// Creates the backend named by the sink configuration.
pub fn create_backend(config: &SinkConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let mut options = HashMap::new();
    options.insert("table".to_string(), config.table.clone());

    match config.engine.as_str() {
        "duckdb" => Ok(Arc::new(DuckDbBackend::new_with_options(
            &config.connection,
            &options,
        )?)),
        "memory" => Ok(Arc::new(InMemoryBackend::new_with_options(
            &config.connection,
            &options,
        )?)),
        other => Err(StorageError::UnsupportedEngine(other.to_string())),
    }
}

/// Accepts ASCII identifiers: a letter or underscore followed by letters,
/// digits or underscores.
pub fn validate_table_name(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}
