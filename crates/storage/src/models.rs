//! Storage models.

use std::path::PathBuf;
use time::UtcDateTime;

/// Blob metadata returned by storage backends.
///
/// Used for listing operations, the "already fetched" check before a
/// download, and orphan detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// Blob size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
}
impl BlobInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }
}
