use super::{from_micros, opt_from_micros, opt_to_micros, to_micros};
use crate::error::{Error, ErrorKind};
use exn::OptionExt;
use lake_remote::{NodeKind, NodeMeta};
use time::UtcDateTime;

/// What the catalog knows about a file beyond its common metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalKind {
    Directory { is_root: bool },
    /// Points at the [`Revision`](super::Revision) currently considered
    /// the file's content.
    Regular { head_revision_id: String },
    /// Points at the [`ExportedVersion`](super::ExportedVersion) keyed by
    /// this modification time.
    Exportable { head_version: UtcDateTime },
}

/// A file record in the catalog.
///
/// There is at most one of these per remote id. A record stays around after
/// the remote file disappears, flagged by `obsolete_since`, until collection
/// removes it for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub meta: NodeMeta,
    pub kind: LocalKind,
    pub obsolete_since: Option<UtcDateTime>,
}
impl LocalFile {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn node_kind(&self) -> NodeKind {
        match self.kind {
            LocalKind::Directory { .. } => NodeKind::Directory,
            LocalKind::Regular { .. } => NodeKind::Regular,
            LocalKind::Exportable { .. } => NodeKind::Exportable,
        }
    }

    pub fn is_live(&self) -> bool {
        self.obsolete_since.is_none()
    }

    pub fn is_root(&self) -> bool {
        matches!(self.kind, LocalKind::Directory { is_root: true })
    }

    pub fn head_revision_id(&self) -> Option<&str> {
        match &self.kind {
            LocalKind::Regular { head_revision_id } => Some(head_revision_id),
            _ => None,
        }
    }

    pub fn head_version(&self) -> Option<UtcDateTime> {
        match self.kind {
            LocalKind::Exportable { head_version } => Some(head_version),
            _ => None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) id: String,
    pub(crate) kind: String,
    pub(crate) name: String,
    pub(crate) mime_type: String,
    pub(crate) created_time: i64,
    pub(crate) modified_time: i64,
    pub(crate) modified_by: Option<String>,
    pub(crate) web_url: Option<String>,
    pub(crate) icon_url: Option<String>,
    pub(crate) parent_id: Option<String>,
    pub(crate) is_root: bool,
    pub(crate) head_revision_id: Option<String>,
    pub(crate) head_version_time: Option<i64>,
    pub(crate) obsolete_since: Option<i64>,
}
impl TryFrom<&LocalFile> for FileRow {
    type Error = Error;
    fn try_from(file: &LocalFile) -> Result<Self, Self::Error> {
        let (is_root, head_revision_id, head_version_time) = match &file.kind {
            LocalKind::Directory { is_root } => (*is_root, None, None),
            LocalKind::Regular { head_revision_id } => (false, Some(head_revision_id.clone()), None),
            LocalKind::Exportable { head_version } => (false, None, Some(to_micros(*head_version)?)),
        };
        Ok(Self {
            id: file.meta.id.clone(),
            kind: file.node_kind().to_string(),
            name: file.meta.name.clone(),
            mime_type: file.meta.mime_type.clone(),
            created_time: to_micros(file.meta.created_time)?,
            modified_time: to_micros(file.meta.modified_time)?,
            modified_by: file.meta.modified_by.clone(),
            web_url: file.meta.web_url.clone(),
            icon_url: file.meta.icon_url.clone(),
            parent_id: file.meta.parent_id.clone(),
            is_root,
            head_revision_id,
            head_version_time,
            obsolete_since: opt_to_micros(file.obsolete_since)?,
        })
    }
}
impl TryFrom<FileRow> for LocalFile {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "directory" => LocalKind::Directory { is_root: row.is_root },
            "regular" => LocalKind::Regular {
                head_revision_id: row.head_revision_id.ok_or_raise(|| ErrorKind::InvalidData("head revision"))?,
            },
            "exportable" => LocalKind::Exportable {
                head_version: from_micros(
                    row.head_version_time.ok_or_raise(|| ErrorKind::InvalidData("head version"))?,
                )?,
            },
            _ => exn::bail!(ErrorKind::InvalidData("file kind")),
        };
        Ok(Self {
            meta: NodeMeta {
                id: row.id,
                name: row.name,
                mime_type: row.mime_type,
                created_time: from_micros(row.created_time)?,
                modified_time: from_micros(row.modified_time)?,
                modified_by: row.modified_by,
                web_url: row.web_url,
                icon_url: row.icon_url,
                parent_id: row.parent_id,
            },
            kind,
            obsolete_since: opt_from_micros(row.obsolete_since)?,
        })
    }
}
