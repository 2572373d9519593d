use crate::tallystream::ResultSink;
use async_trait::async_trait;
use std::sync::Arc;
use tallystream_core::config::SinkConfig;
use tallystream_core::records::{FinalRecord, SinkItem};
use tallystream_core::storage::{create_backend, StorageBackend, StorageError};
use tracing::debug;

/// Writes final records to a storage backend in fixed-size batches.
pub struct SinkServiceImpl {
    backend: Arc<dyn StorageBackend>,
    batch_size: usize,
}

impl SinkServiceImpl {
    /// Opens and initializes the backend named by the sink configuration.
    pub async fn new(config: &SinkConfig) -> Result<Self, StorageError> {
        let backend = create_backend(config)?;
        backend.init().await?;
        Ok(Self::with_backend(backend, config.batch_size))
    }

    pub fn with_backend(backend: Arc<dyn StorageBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }
}

#[async_trait]
impl ResultSink for SinkServiceImpl {
    async fn write_records(
        &self,
        request_id: &str,
        records: Vec<FinalRecord>,
    ) -> Result<usize, StorageError> {
        let mut items = records
            .into_iter()
            .map(|record| SinkItem::from_record(request_id, record))
            .peekable();

        let mut written = 0;
        let mut batches = 0;
        while items.peek().is_some() {
            let batch: Vec<SinkItem> = items.by_ref().take(self.batch_size).collect();
            let len = batch.len();
            self.backend.put_items(batch).await?;
            written += len;
            batches += 1;
            debug!(request_id, batch = batches, items = len, "Wrote batch");
        }

        Ok(written)
    }
}
