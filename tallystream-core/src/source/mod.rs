//! Record sources for delimited datasets.
//!
//! A record source yields typed rows in fixed-size chunks, strictly in the
//! order they appear in the underlying blob. It can only be restarted by
//! reopening the blob.
//!
//! - `blob`: access to the raw bytes (local filesystem, or S3 with the `s3` feature)
//! - `delimited`: CSV decoding and chunking

pub mod blob;
pub mod delimited;
#[cfg(feature = "s3")]
pub mod s3;

use crate::aggregation::Row;
use crate::config::{AggregationConfig, SourceConfig};
use thiserror::Error;
use tracing::info;

pub use blob::{BlobStore, LocalBlobStore};
pub use delimited::{CsvOptions, CsvRecordSource};

/// Record source error types
#[derive(Error, Debug)]
pub enum SourceError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The delimited text could not be decoded
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A configured field is absent from the header row
    #[error("Missing header field: {0}")]
    MissingField(String),

    /// A row has no value for a configured field
    #[error("Missing value for field {field} on line {line}")]
    MissingValue { line: u64, field: String },

    /// A numeric measure could not be parsed
    #[error("Invalid numeric value {value:?} for field {field} on line {line}")]
    InvalidNumeric {
        line: u64,
        field: String,
        value: String,
    },

    /// The named blob does not exist
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// The blob store could not serve the request
    #[error("Blob store error: {0}")]
    Blob(String),

    /// Invalid source configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Header names that feed each row field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub group_first: String,
    pub group_second: String,
    pub numeric: String,
    pub categorical: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            group_first: "Hospital".to_string(),
            group_second: "Diagnosis".to_string(),
            numeric: "Recovery Time".to_string(),
            categorical: "Treatment".to_string(),
        }
    }
}

/// A lazy, finite producer of row chunks.
pub trait RecordSource: Send {
    /// Returns the next chunk in source order, or `None` once the source is
    /// exhausted. Chunks are never empty.
    fn next_chunk(&mut self) -> Result<Option<Vec<Row>>, SourceError>;
}

/// Opens the configured dataset as a chunked record source.
pub async fn open_source(
    source: &SourceConfig,
    aggregation: &AggregationConfig,
) -> Result<Box<dyn RecordSource>, SourceError> {
    let fields = aggregation
        .field_mapping()
        .map_err(|e| SourceError::Configuration(e.to_string()))?;
    let options = CsvOptions {
        delimiter: source
            .delimiter_byte()
            .map_err(|e| SourceError::Configuration(e.to_string()))?,
        trim: source.trim,
    };

    let reader = match source.engine.as_str() {
        "local" => LocalBlobStore::new(&source.bucket).open(&source.key).await?,
        #[cfg(feature = "s3")]
        "s3" => s3::S3BlobStore::from_env(&source.bucket)
            .await
            .open(&source.key)
            .await?,
        other => {
            return Err(SourceError::Configuration(format!(
                "Unsupported source engine: {}",
                other
            )))
        }
    };

    info!(
        engine = %source.engine,
        bucket = %source.bucket,
        key = %source.key,
        chunk_size = aggregation.chunk_size,
        "Opened record source"
    );

    Ok(Box::new(CsvRecordSource::new(
        reader,
        fields,
        options,
        aggregation.chunk_size,
    )?))
}
