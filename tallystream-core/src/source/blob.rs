use crate::source::SourceError;
use async_trait::async_trait;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;

/// Read access to named blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Opens the blob for sequential reading.
    async fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, SourceError>;
}

/// Blob store backed by a directory on the local filesystem.
///
/// Blobs are streamed from disk, so datasets larger than memory are fine.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn open(&self, key: &str) -> Result<Box<dyn Read + Send>, SourceError> {
        let path = self.root.join(key);
        match std::fs::File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SourceError::BlobNotFound(path.display().to_string()))
            }
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}
