//! Tallystream job binary.
//!
//! Runs one aggregation job: reads a delimited dataset in chunks, merges
//! per-group statistics and writes one record per group to the destination
//! store under the job's request id.
//!
//! # Configuration
//!
//! Configuration can be provided through multiple sources, in order of precedence:
//!
//! 1. Command-line arguments (highest precedence)
//! 2. Environment variables (prefixed with `TALLYSTREAM_`)
//! 3. User-specified configuration file (via `--config`)
//! 4. System-wide configuration (`/etc/tallystream/config.toml`)
//! 5. Default configuration (embedded in binary)
//!
//! ## Command-line Options
//!
//! ```text
//! Options:
//!   -c, --config <FILE>              Path to configuration file
//!       --source-engine <TYPE>       Record source engine ("local" or "s3")
//!       --bucket <BUCKET>            Bucket or local root directory [env: S3_BUCKET]
//!       --key <KEY>                  Blob name of the dataset [env: FILE_NAME]
//!       --chunk-size <ROWS>          Rows per chunk
//!       --pipelined                  Read ahead on a blocking task
//!       --sink-engine <TYPE>         Destination engine ("duckdb" or "memory")
//!       --sink-connection <STR>      Destination connection string
//!       --table <TABLE>              Destination table [env: DB_TABLE]
//!       --batch-size <ITEMS>         Items per destination write
//!       --request-id <ID>            Partition key; a UUID is generated when omitted
//!       --log-json                   Emit logs as JSON lines
//!       --verify                     Read the partition back after writing
//! ```
//!
//! # Examples
//!
//! ```bash
//! # Aggregate ./data/visits.csv into a DuckDB file
//! tallystream --bucket ./data --key visits.csv --sink-connection stats.db
//!
//! # Same job driven by the runtime environment
//! S3_BUCKET=./data FILE_NAME=visits.csv DB_TABLE=group_stats tallystream
//!
//! # Larger chunks, read-ahead, structured logs
//! RUST_LOG=debug tallystream --chunk-size 50000 --pipelined --log-json
//! ```

use clap::Parser;
use tallystream::{EngineOptions, SinkServiceImpl, Tallystream};
use tallystream_core::config::{CliArgs, LoggingConfig, Settings};
use tallystream_core::source::open_source;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.json {
        builder
            .json()
            .with_current_span(false)
            .without_time()
            .with_target(false)
            .init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli_args = CliArgs::parse();

    // Load settings from config files, environment and CLI args
    let settings = Settings::new(&cli_args)?;
    init_tracing(&settings.logging);

    let request_id = cli_args
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Open the dataset and the destination store
    let source = open_source(&settings.source, &settings.aggregation).await?;
    let sink = SinkServiceImpl::new(&settings.sink).await?;
    let backend = sink.backend();

    let job = Tallystream::with_options(
        source,
        Box::new(sink),
        EngineOptions::from(&settings.aggregation),
    );
    let summary = job.run_job(&request_id).await?;

    if cli_args.verify {
        let stored = backend.query_partition(&request_id).await?;
        info!(
            request_id = %request_id,
            stored = stored.num_rows(),
            expected = summary.records_written,
            "Verified partition"
        );
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
