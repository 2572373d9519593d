//! Tallystream: chunked group-by statistics job runner
//!
//! This library drives one aggregation job end to end: a record source is
//! drained chunk by chunk, partial aggregates are merged in source order, and
//! the final per-group records are written to a key-value store under the
//! job's request id.
//!
//! # Example
//!
//! ```rust,no_run
//! use tallystream::{SinkServiceImpl, Tallystream, EngineOptions};
//! use tallystream_core::config::{CliArgs, Settings};
//! use tallystream_core::source::open_source;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load settings from defaults, files and environment
//!     let settings = Settings::new(&CliArgs::default())?;
//!
//!     // Open the dataset and the destination store
//!     let source = open_source(&settings.source, &settings.aggregation).await?;
//!     let sink = SinkServiceImpl::new(&settings.sink).await?;
//!
//!     // Run the job
//!     let job = Tallystream::with_options(
//!         source,
//!         Box::new(sink),
//!         EngineOptions::from(&settings.aggregation),
//!     );
//!     let summary = job.run_job("req-1").await?;
//!     println!("Wrote {} records", summary.records_written);
//!
//!     Ok(())
//! }
//! ```

pub mod sink_service;
pub mod tallystream;
pub mod tests;

pub use sink_service::SinkServiceImpl;
pub use tallystream::{EngineOptions, JobError, JobSummary, ResultSink, Tallystream};
