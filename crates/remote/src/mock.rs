//! In-memory remote for testing.

use crate::error::{ErrorKind, Result};
use crate::format::ExportFormat;
use crate::node::{RemoteContent, RemoteNode};
use crate::provider::{RemoteProvider, SupportedFormats};
use crate::tree::RemoteTree;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

struct MockState {
    tree: RemoteTree,
    contents: HashMap<String, Vec<u8>>,
    formats: SupportedFormats,
    tree_unreachable: bool,
    failing_fetches: HashSet<String>,
    downloads: usize,
    exports: usize,
}

/// In-memory [`RemoteProvider`] with a mutable snapshot.
///
/// Content defaults to bytes derived from the node's identity (revision id,
/// or modified time plus extension) so that a content change is visible in
/// the fetched bytes without any setup. Fetches and whole snapshots can be
/// made to fail, and every successful fetch is counted.
pub struct MockRemote {
    state: RwLock<MockState>,
}

impl MockRemote {
    pub fn new(tree: RemoteTree) -> Self {
        Self {
            state: RwLock::new(MockState {
                tree,
                contents: HashMap::new(),
                formats: default_formats(),
                tree_unreachable: false,
                failing_fetches: HashSet::new(),
                downloads: 0,
                exports: 0,
            }),
        }
    }

    pub fn with_export_formats(self, formats: SupportedFormats) -> Self {
        let mut state = self.state.into_inner();
        state.formats = formats;
        Self { state: RwLock::new(state) }
    }

    /// Replace the whole snapshot.
    pub async fn set_tree(&self, tree: RemoteTree) {
        self.state.write().await.tree = tree;
    }

    /// Add a node to the snapshot.
    pub async fn insert(&self, node: RemoteNode) -> Result<()> {
        self.state.write().await.tree.insert(node)
    }

    /// Remove a node (and its subtree) from the snapshot.
    pub async fn remove(&self, id: &str) -> Option<RemoteNode> {
        self.state.write().await.tree.remove(id)
    }

    /// Edit a node in place. Returns `false` if there is no such node.
    ///
    /// Panics if the edit changes the node's id or parent.
    pub async fn modify(&self, id: &str, edit: impl FnOnce(&mut RemoteNode)) -> bool {
        let mut state = self.state.write().await;
        let Some(node) = state.tree.get_mut(id) else {
            return false;
        };
        let parent = node.meta.parent_id.clone();
        edit(node);
        assert_eq!(node.meta.id, id, "MockRemote::modify: id changed");
        assert_eq!(node.meta.parent_id, parent, "MockRemote::modify: parent changed");
        true
    }

    /// Override the bytes returned for a file.
    pub async fn set_content(&self, id: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.state.write().await.contents.insert(id.into(), data.into());
    }

    /// Make [`get_tree`](RemoteProvider::get_tree) fail (or succeed again).
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.write().await.tree_unreachable = unreachable;
    }

    /// Make downloads and exports of `id` fail.
    pub async fn fail_fetches(&self, id: impl Into<String>) {
        self.state.write().await.failing_fetches.insert(id.into());
    }

    pub async fn heal_fetches(&self, id: &str) {
        self.state.write().await.failing_fetches.remove(id);
    }

    /// Number of successful downloads so far.
    pub async fn downloads(&self) -> usize {
        self.state.read().await.downloads
    }

    /// Number of successful exports so far (one per format).
    pub async fn exports(&self) -> usize {
        self.state.read().await.exports
    }
}

/// What the remote offers for the three common document types.
fn default_formats() -> SupportedFormats {
    let offer = |mime: &str, extensions: &[&str]| {
        let formats = extensions.iter().map(|ext| ExportFormat::from_extension(ext)).collect();
        (format!("application/vnd.google-apps.{mime}"), formats)
    };
    HashMap::from([
        offer("document", &["docx", "epub", "html.zip", "odt", "pdf", "rtf", "txt"]),
        offer("spreadsheet", &["csv", "html.zip", "ods", "pdf", "tsv", "xlsx"]),
        offer("presentation", &["odp", "pdf", "pptx", "txt"]),
    ])
}

#[async_trait]
impl RemoteProvider for MockRemote {
    async fn get_tree(&self) -> Result<RemoteTree> {
        let state = self.state.read().await;
        if state.tree_unreachable {
            exn::bail!(ErrorKind::Transport("remote unreachable".to_string()));
        }
        Ok(state.tree.clone())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let mut state = self.state.write().await;
        if state.failing_fetches.contains(file_id) {
            exn::bail!(ErrorKind::Transport(format!("download of {file_id} failed")));
        }
        let node = state.tree.get(file_id).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(file_id.to_string())))?;
        let data = match &node.content {
            RemoteContent::Regular { can_download: false, .. } => {
                exn::bail!(ErrorKind::Unsupported(format!("{file_id} can't be downloaded")))
            },
            RemoteContent::Regular { revision_id, .. } => match state.contents.get(file_id) {
                Some(data) => data.clone(),
                None => format!("{file_id}@{revision_id}").into_bytes(),
            },
            _ => exn::bail!(ErrorKind::Unsupported(format!("{file_id} is not a regular file"))),
        };
        state.downloads += 1;
        tracing::debug!(id = file_id, bytes = data.len(), "Mock download");
        Ok(data)
    }

    async fn export(&self, file_id: &str, format: &ExportFormat) -> Result<Vec<u8>> {
        let mut state = self.state.write().await;
        if state.failing_fetches.contains(file_id) {
            exn::bail!(ErrorKind::Transport(format!("export of {file_id} failed")));
        }
        let node = state.tree.get(file_id).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(file_id.to_string())))?;
        match node.content {
            RemoteContent::Exportable { can_export: true } => {},
            RemoteContent::Exportable { can_export: false } => {
                exn::bail!(ErrorKind::Unsupported(format!("{file_id} can't be exported")))
            },
            _ => exn::bail!(ErrorKind::Unsupported(format!("{file_id} is not exportable"))),
        }
        if !state.formats.get(&node.meta.mime_type).is_some_and(|f| f.contains(format)) {
            exn::bail!(ErrorKind::Unsupported(format!("{file_id} can't be exported as {format}")));
        }
        let data = match state.contents.get(file_id) {
            Some(data) => data.clone(),
            None => format!("{file_id}@{}.{}", node.meta.modified_time.unix_timestamp_nanos(), format.extension)
                .into_bytes(),
        };
        state.exports += 1;
        tracing::debug!(id = file_id, format = %format, bytes = data.len(), "Mock export");
        Ok(data)
    }

    async fn supported_export_formats(&self) -> Result<SupportedFormats> {
        let state = self.state.read().await;
        if state.tree_unreachable {
            exn::bail!(ErrorKind::Transport("remote unreachable".to_string()));
        }
        Ok(state.formats.clone())
    }
}
