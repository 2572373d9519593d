//! Configuration management for Tallystream jobs.
//!
//! This module provides configuration handling through multiple sources:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/tallystream/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `TALLYSTREAM_`, sections separated by `__`)
//! 5. Command-line arguments
//!
//! Configuration options are loaded in order of precedence, with later sources
//! overriding earlier ones.
//!
//! # Environment Variables
//!
//! The variables set by the hosted job runtime are honoured as
//! command-line defaults:
//! - `S3_BUCKET` - Bucket (or local root directory) holding the dataset
//! - `FILE_NAME` - Blob name of the dataset
//! - `DB_TABLE` - Destination table

use clap::Parser;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::source::FieldMapping;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/tallystream/config.toml";

/// Command-line arguments parser.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Record source engine ("local" or "s3")
    #[arg(long)]
    pub source_engine: Option<String>,

    /// Bucket name, or root directory for the local engine
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    /// Blob name of the dataset
    #[arg(long, env = "FILE_NAME")]
    pub key: Option<String>,

    /// Rows per chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Read the next chunk while the current one is aggregated
    #[arg(long)]
    pub pipelined: bool,

    /// Destination store engine ("duckdb" or "memory")
    #[arg(long)]
    pub sink_engine: Option<String>,

    /// Destination store connection string
    #[arg(long)]
    pub sink_connection: Option<String>,

    /// Destination table
    #[arg(long, env = "DB_TABLE")]
    pub table: Option<String>,

    /// Items per destination write batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Partition key for this job; generated when omitted
    #[arg(long)]
    pub request_id: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Read the partition back after writing and log the stored row count
    #[arg(long)]
    pub verify: bool,
}

/// Complete job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub source: SourceConfig,
    pub aggregation: AggregationConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Location and decoding of the input dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Blob store type ("local" or "s3")
    pub engine: String,
    pub bucket: String,
    pub key: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Trim surrounding whitespace from every field
    #[serde(default)]
    pub trim: bool,
}

/// Engine tuning and field mapping.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    pub chunk_size: usize,
    /// Exactly two header names forming the group key
    pub group_fields: Vec<String>,
    pub numeric_field: String,
    pub categorical_field: String,
    #[serde(default)]
    pub pipelined: bool,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

/// Destination store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Engine type ("duckdb" or "memory")
    pub engine: String,
    pub connection: String,
    pub table: String,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_queue_depth() -> usize {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                engine: "local".to_string(),
                bucket: ".".to_string(),
                key: "data.csv".to_string(),
                delimiter: default_delimiter(),
                trim: false,
            },
            aggregation: AggregationConfig {
                chunk_size: 10_000,
                group_fields: vec!["Hospital".to_string(), "Diagnosis".to_string()],
                numeric_field: "Recovery Time".to_string(),
                categorical_field: "Treatment".to_string(),
                pipelined: false,
                queue_depth: default_queue_depth(),
            },
            sink: SinkConfig {
                engine: "duckdb".to_string(),
                connection: ":memory:".to_string(),
                table: "group_stats".to_string(),
                batch_size: 25,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl SourceConfig {
    /// The delimiter as a single byte.
    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        match self.delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(ConfigError::Message(format!(
                "source.delimiter must be a single byte, got {:?}",
                self.delimiter
            ))),
        }
    }
}

impl AggregationConfig {
    /// Header names mapped onto row fields.
    pub fn field_mapping(&self) -> Result<FieldMapping, ConfigError> {
        match self.group_fields.as_slice() {
            [first, second] => Ok(FieldMapping {
                group_first: first.clone(),
                group_second: second.clone(),
                numeric: self.numeric_field.clone(),
                categorical: self.categorical_field.clone(),
            }),
            fields => Err(ConfigError::Message(format!(
                "aggregation.group_fields must name exactly two fields, got {}",
                fields.len()
            ))),
        }
    }
}

impl Settings {
    /// Loads settings from every source, honouring precedence.
    pub fn new(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            builder = builder.add_source(File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
        }

        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(File::from(config_path.clone()));
        }

        builder = builder.add_source(
            Environment::with_prefix("TALLYSTREAM")
                .prefix_separator("_")
                .separator("__"),
        );

        if let Some(ref engine) = cli.source_engine {
            builder = builder.set_override("source.engine", engine.as_str())?;
        }
        if let Some(ref bucket) = cli.bucket {
            builder = builder.set_override("source.bucket", bucket.as_str())?;
        }
        if let Some(ref key) = cli.key {
            builder = builder.set_override("source.key", key.as_str())?;
        }
        if let Some(chunk_size) = cli.chunk_size {
            builder = builder.set_override("aggregation.chunk_size", chunk_size as i64)?;
        }
        if cli.pipelined {
            builder = builder.set_override("aggregation.pipelined", true)?;
        }
        if let Some(ref engine) = cli.sink_engine {
            builder = builder.set_override("sink.engine", engine.as_str())?;
        }
        if let Some(ref connection) = cli.sink_connection {
            builder = builder.set_override("sink.connection", connection.as_str())?;
        }
        if let Some(ref table) = cli.table {
            builder = builder.set_override("sink.table", table.as_str())?;
        }
        if let Some(batch_size) = cli.batch_size {
            builder = builder.set_override("sink.batch_size", batch_size as i64)?;
        }
        if cli.log_json {
            builder = builder.set_override("logging.json", true)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregation.chunk_size == 0 {
            return Err(ConfigError::Message(
                "aggregation.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.aggregation.queue_depth == 0 {
            return Err(ConfigError::Message(
                "aggregation.queue_depth must be at least 1".to_string(),
            ));
        }
        if self.sink.batch_size == 0 {
            return Err(ConfigError::Message(
                "sink.batch_size must be at least 1".to_string(),
            ));
        }
        self.aggregation.field_mapping()?;
        self.source.delimiter_byte()?;
        Ok(())
    }
}
