//! In-memory storage backend for testing.

use super::BlobInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::BlobInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Blobs live in a `HashMap` behind a [`RwLock`]. Individual paths can be
/// made to fail on delete, which is how collection tests exercise the "keep
/// the row, retry next pass" path.
pub struct MockBackend {
    name: String,
    blobs: RwLock<HashMap<PathBuf, (UtcDateTime, Vec<u8>)>>,
    failing_deletes: RwLock<HashSet<PathBuf>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with blobs.
    ///
    /// Panics if any path fails validation: broken test setup should not
    /// produce a passing test.
    pub fn with_blobs(blobs: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = UtcDateTime::now();
        let mut map = HashMap::new();
        for (path, data) in blobs {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_blobs: invalid path {}", path.display());
            };
            map.insert(validated, (now, data.into()));
        }
        Self {
            name: "mock".to_string(),
            blobs: RwLock::new(map),
            failing_deletes: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every subsequent delete of `path` fail with an I/O error.
    pub async fn fail_deletes(&self, path: impl Into<PathBuf>) {
        self.failing_deletes.write().await.insert(path.into());
    }

    /// Let deletes of `path` succeed again.
    pub async fn heal_deletes(&self, path: impl AsRef<Path>) {
        self.failing_deletes.write().await.remove(path.as_ref());
    }

    /// Sorted names of every stored blob.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.blobs.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let blobs: [(&str, &str); 0] = [];
        Self::with_blobs(blobs)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> BlobInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        Box::pin(stream! {
            // Snapshot under the read lock so it isn't held across yields.
            let entries: Vec<BlobInfo> = {
                let guard = self.blobs.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| validated_prefix.as_ref().is_none_or(|pfx| path.starts_with(pfx)))
                    .map(|(path, (modified, data))| BlobInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect()
            };
            for entry in entries {
                yield Ok(entry);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.blobs.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.blobs.read().await;
        let (_modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(data.clone())
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.blobs.write().await.insert(path, (UtcDateTime::now(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        if self.failing_deletes.read().await.contains(&path) {
            exn::bail!(ErrorKind::Io(std::io::Error::other("injected delete failure")));
        }
        self.blobs.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<BlobInfo> {
        let path = validate_path(path)?;
        let guard = self.blobs.read().await;
        let (modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(BlobInfo::new(path.clone(), data.len() as u64, *modified))
    }
}
