//! Remote node model.
//!
//! One [`RemoteNode`] per file or directory in a snapshot. The three kinds
//! carry different content descriptors, so they are a tagged union rather
//! than a trait: every algorithm that cares branches on [`RemoteContent`]
//! explicitly.

use derive_more::Display;
use time::UtcDateTime;

/// MIME type the remote uses for directories.
pub const DIRECTORY_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// Prefix of the MIME types of documents that only exist in exported form.
pub const EXPORTABLE_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// Which of the three node kinds a MIME type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum NodeKind {
    #[display("directory")]
    Directory,
    #[display("regular")]
    Regular,
    #[display("exportable")]
    Exportable,
}
impl NodeKind {
    /// Classify a remote MIME type.
    ///
    /// ```
    /// use lake_remote::NodeKind;
    /// assert_eq!(NodeKind::from_mime_type("application/vnd.google-apps.folder"), NodeKind::Directory);
    /// assert_eq!(NodeKind::from_mime_type("application/vnd.google-apps.document"), NodeKind::Exportable);
    /// assert_eq!(NodeKind::from_mime_type("text/plain"), NodeKind::Regular);
    /// ```
    pub fn from_mime_type(mime_type: &str) -> Self {
        if mime_type == DIRECTORY_MIME_TYPE {
            Self::Directory
        } else if mime_type.starts_with(EXPORTABLE_MIME_PREFIX) {
            Self::Exportable
        } else {
            Self::Regular
        }
    }
}

/// Attributes every node has, whatever its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMeta {
    /// Remote-assigned, stable and unique.
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: UtcDateTime,
    pub modified_time: UtcDateTime,
    /// Display name of whoever last modified the node.
    pub modified_by: Option<String>,
    pub web_url: Option<String>,
    pub icon_url: Option<String>,
    /// `None` only for the root of a snapshot.
    pub parent_id: Option<String>,
}
impl NodeMeta {
    /// Metadata with both timestamps set to `time` and no optional fields.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        time: UtcDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            created_time: time,
            modified_time: time,
            modified_by: None,
            web_url: None,
            icon_url: None,
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Kind-specific content descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteContent {
    Directory,
    /// A file with native bytes, identified by an opaque revision id.
    Regular {
        revision_id: String,
        size: Option<u64>,
        /// MD5 checksum as reported by the remote, when it reports one.
        content_hash: Option<String>,
        can_download: bool,
    },
    /// A document with no native bytes; content only exists in exported form.
    Exportable { can_export: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub meta: NodeMeta,
    pub content: RemoteContent,
}
impl RemoteNode {
    pub fn directory(meta: NodeMeta) -> Self {
        Self { meta, content: RemoteContent::Directory }
    }

    pub fn regular(meta: NodeMeta, revision_id: impl Into<String>, size: u64, content_hash: impl Into<String>) -> Self {
        Self {
            meta,
            content: RemoteContent::Regular {
                revision_id: revision_id.into(),
                size: Some(size),
                content_hash: Some(content_hash.into()),
                can_download: true,
            },
        }
    }

    pub fn exportable(meta: NodeMeta) -> Self {
        Self { meta, content: RemoteContent::Exportable { can_export: true } }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn kind(&self) -> NodeKind {
        match self.content {
            RemoteContent::Directory => NodeKind::Directory,
            RemoteContent::Regular { .. } => NodeKind::Regular,
            RemoteContent::Exportable { .. } => NodeKind::Exportable,
        }
    }
}
