//! S3 blob store.
//!
//! The object body is collected before decoding starts; the CSV decoder
//! reads synchronously and S3 bodies are only exposed as async streams.

use crate::source::{BlobStore, SourceError};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use std::io::{Cursor, Read};
use tracing::{debug, error};

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Creates a store using credentials and region from the environment.
    pub async fn from_env(bucket: &str) -> Self {
        let aws_config = aws_config::load_from_env().await;
        Self::new(Client::new(&aws_config), bucket)
    }

    pub fn new(client: Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, SourceError> {
        debug!(bucket = %self.bucket, key, "Fetching object");

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    return SourceError::BlobNotFound(format!("s3://{}/{}", self.bucket, key));
                }
                error!({ %err }, "Error while reading file from s3 bucket");
                SourceError::Blob(format!("Failed to get s3://{}/{}: {}", self.bucket, key, err))
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| SourceError::Blob(format!("Failed to read object body: {}", e)))?
            .into_bytes();

        Ok(Box::new(Cursor::new(bytes)))
    }
}
