use crate::records::{create_record_batch, SinkItem};
use crate::storage::{StorageBackend, StorageError};
use arrow_array::RecordBatch;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type ItemKey = (String, String);

/// Ordered in-memory store keyed by `(partition_key, sort_key)`.
///
/// Contents live as long as the backend; nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    items: Arc<RwLock<BTreeMap<ItemKey, SinkItem>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items across all partitions.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn put_items(&self, items: Vec<SinkItem>) -> Result<(), StorageError> {
        let mut stored = self.items.write().await;
        for item in items {
            stored.insert((item.partition_key.clone(), item.sort_key.clone()), item);
        }
        Ok(())
    }

    async fn query_partition(&self, partition_key: &str) -> Result<RecordBatch, StorageError> {
        let stored = self.items.read().await;
        let items: Vec<SinkItem> = stored
            .values()
            .filter(|item| item.partition_key == partition_key)
            .cloned()
            .collect();
        Ok(create_record_batch(&items)?)
    }

    fn new_with_options(
        _connection_string: &str,
        _options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Ok(Self::new())
    }
}
