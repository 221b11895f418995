//! Remote provider contract.

use crate::error::Result;
use crate::format::ExportFormat;
use crate::tree::RemoteTree;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Formats the remote can export to, keyed by document MIME type.
pub type SupportedFormats = HashMap<String, BTreeSet<ExportFormat>>;

pub type ProviderHandle = Arc<dyn RemoteProvider + Send + Sync>;

/// Everything the mirror needs from the remote store.
///
/// Transport, authentication, pagination and retries all live behind this
/// trait. An error returned from any method means the provider already gave
/// up; callers don't retry.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Fetch the full tree under the configured root.
    ///
    /// All or nothing: a failure anywhere during traversal fails the whole
    /// snapshot.
    async fn get_tree(&self) -> Result<RemoteTree>;

    /// Bytes of the head revision of a regular file.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Bytes of an exportable document converted to `format`.
    async fn export(&self, file_id: &str, format: &ExportFormat) -> Result<Vec<u8>>;

    /// Export formats the remote supports, per document MIME type.
    async fn supported_export_formats(&self) -> Result<SupportedFormats>;
}
