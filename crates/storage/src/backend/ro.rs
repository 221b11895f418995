//! Read-only storage backend.
//!
//! Wraps another backend and turns every mutation into a logged no-op that
//! reports success. Collection passes run against it to preview what would
//! be deleted.

use async_trait::async_trait;
use std::path::Path;

use crate::backend::BlobInfoStream;
use crate::error::Result;
use crate::{BackendHandle, BlobInfo, StorageBackend};

#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> BlobInfoStream<'a> {
        self.inner.list_stream(prefix)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        tracing::info!(
            backend = self.name(),
            path = %path.display(),
            bytes = data.len(),
            "Skipping write during read-only mode"
        );
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tracing::info!(backend = self.name(), path = %path.display(), "Skipping delete during read-only mode");
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<BlobInfo> {
        self.inner.stat(path).await
    }
}
