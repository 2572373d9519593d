use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tallystream_core::aggregation::{aggregate_chunk, AggregateMerger, Row};
use tallystream_core::config::AggregationConfig;
use tallystream_core::records::FinalRecord;
use tallystream_core::source::{RecordSource, SourceError};
use tallystream_core::storage::StorageError;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

/// Job error types
#[derive(Error, Debug)]
pub enum JobError {
    /// Reading or decoding the dataset failed
    #[error("Record source failed: {0}")]
    Source(#[from] SourceError),

    /// Persisting the results failed
    #[error("Sink failed: {0}")]
    Sink(#[from] StorageError),

    /// The background reader panicked or was cancelled
    #[error("Record source task failed: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

/// Outcome of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub request_id: String,
    pub rows_processed: u64,
    pub chunks_processed: usize,
    pub groups: usize,
    pub records_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Read the next chunk on a blocking task while the current one is merged
    pub pipelined: bool,
    /// Chunks buffered between reader and merger in pipelined mode
    pub queue_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pipelined: false,
            queue_depth: 2,
        }
    }
}

impl From<&AggregationConfig> for EngineOptions {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            pipelined: config.pipelined,
            queue_depth: config.queue_depth,
        }
    }
}

/// Destination for the final records of a job.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persists every record under the job's request id and returns the
    /// number of records written.
    async fn write_records(
        &self,
        request_id: &str,
        records: Vec<FinalRecord>,
    ) -> Result<usize, StorageError>;
}

/// One aggregation job: a record source drained into a sink.
///
/// Results reach the sink only after the source is exhausted and every
/// chunk has been merged; a failure before that point writes nothing.
pub struct Tallystream {
    source: Box<dyn RecordSource>,
    sink: Box<dyn ResultSink>,
    options: EngineOptions,
}

impl Tallystream {
    pub fn new(source: Box<dyn RecordSource>, sink: Box<dyn ResultSink>) -> Self {
        Self::with_options(source, sink, EngineOptions::default())
    }

    pub fn with_options(
        source: Box<dyn RecordSource>,
        sink: Box<dyn ResultSink>,
        options: EngineOptions,
    ) -> Self {
        Self {
            source,
            sink,
            options,
        }
    }

    /// Runs the job to completion under the given request id.
    pub async fn run_job(self, request_id: &str) -> Result<JobSummary, JobError> {
        let started_at = Utc::now();
        info!(request_id, pipelined = self.options.pipelined, "Job started");

        match self.execute(request_id, started_at).await {
            Ok(summary) => {
                info!(
                    request_id,
                    rows = summary.rows_processed,
                    groups = summary.groups,
                    records_written = summary.records_written,
                    "Job completed"
                );
                Ok(summary)
            }
            Err(err) => {
                error!(request_id, error = %err, "Job failed");
                Err(err)
            }
        }
    }

    async fn execute(
        self,
        request_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<JobSummary, JobError> {
        let Self {
            source,
            sink,
            options,
        } = self;

        let mut merger = AggregateMerger::new();
        let mut chunks = chunk_stream(source, options);

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let rows = chunk.len();
            let partials = aggregate_chunk(chunk);
            debug!(
                chunk = merger.chunks_merged(),
                rows,
                groups = partials.len(),
                "Merging chunk"
            );
            merger.merge(partials);
        }

        let rows_processed = merger.rows_merged();
        let chunks_processed = merger.chunks_merged();
        info!(rows = rows_processed, chunks = chunks_processed, "Parsed all rows");

        let records = merger.finish();
        let groups = records.len();
        info!(groups, "Materialized final records");

        let records_written = if records.is_empty() {
            0
        } else {
            sink.write_records(request_id, records).await?
        };

        Ok(JobSummary {
            request_id: request_id.to_string(),
            rows_processed,
            chunks_processed,
            groups,
            records_written,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Turns a record source into an ordered stream of chunks.
fn chunk_stream(
    source: Box<dyn RecordSource>,
    options: EngineOptions,
) -> BoxStream<'static, Result<Vec<Row>, JobError>> {
    if options.pipelined {
        pipelined_chunks(source, options.queue_depth.max(1))
    } else {
        sequential_chunks(source)
    }
}

fn sequential_chunks(
    mut source: Box<dyn RecordSource>,
) -> BoxStream<'static, Result<Vec<Row>, JobError>> {
    Box::pin(async_stream::stream! {
        loop {
            match source.next_chunk() {
                Ok(Some(chunk)) => yield Ok::<_, JobError>(chunk),
                Ok(None) => break,
                Err(e) => {
                    yield Err(JobError::from(e));
                    break;
                }
            }
        }
    })
}

/// Reads chunks on a blocking task, handing them over through a bounded
/// queue. Order is preserved, so merged results match sequential mode.
fn pipelined_chunks(
    mut source: Box<dyn RecordSource>,
    queue_depth: usize,
) -> BoxStream<'static, Result<Vec<Row>, JobError>> {
    let (tx, rx) = mpsc::channel::<Result<Vec<Row>, SourceError>>(queue_depth);

    let producer = tokio::task::spawn_blocking(move || loop {
        match source.next_chunk() {
            Ok(Some(chunk)) => {
                if tx.blocking_send(Ok(chunk)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    });

    Box::pin(async_stream::stream! {
        let mut received = ReceiverStream::new(rx);
        while let Some(chunk) = received.next().await {
            match chunk {
                Ok(chunk) => yield Ok::<_, JobError>(chunk),
                Err(e) => {
                    yield Err(JobError::from(e));
                    return;
                }
            }
        }
        // A closed queue is only a clean end if the reader finished normally.
        if let Err(e) = producer.await {
            yield Err(JobError::from(e));
        }
    })
}
