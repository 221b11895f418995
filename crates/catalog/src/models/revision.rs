use super::{from_micros, opt_from_micros, opt_to_micros, to_micros};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// One fetched state of a regular file's content.
///
/// Keyed by `(file_id, revision_id)`. Whether the bytes behind it are the
/// file's current content is decided by the file's head pointer, not by the
/// revision itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub file_id: String,
    pub revision_id: String,
    pub name: String,
    pub mime_type: String,
    pub size: Option<u64>,
    /// MD5 checksum reported by the remote.
    pub content_hash: Option<String>,
    pub can_download: bool,
    pub modified_time: UtcDateTime,
    pub modified_by: Option<String>,
    pub obsolete_since: Option<UtcDateTime>,
}
impl Revision {
    /// Name of the blob holding this revision's bytes.
    ///
    /// ```
    /// # use lake_catalog::models::Revision;
    /// # use time::UtcDateTime;
    /// let revision = Revision {
    ///     file_id: "tx".to_string(),
    ///     revision_id: "r1".to_string(),
    ///     name: "notes.txt".to_string(),
    ///     mime_type: "text/plain".to_string(),
    ///     size: Some(5),
    ///     content_hash: Some("5d41402abc4b2a76b9719d911017c592".to_string()),
    ///     can_download: true,
    ///     modified_time: UtcDateTime::UNIX_EPOCH,
    ///     modified_by: None,
    ///     obsolete_since: None,
    /// };
    /// assert_eq!(revision.blob_name(), "tx_r1_5d41402abc4b2a76b9719d911017c592");
    /// ```
    pub fn blob_name(&self) -> String {
        match &self.content_hash {
            Some(hash) => format!("{}_{}_{}", self.file_id, self.revision_id, hash),
            None => format!("{}_{}", self.file_id, self.revision_id),
        }
    }

    pub fn is_live(&self) -> bool {
        self.obsolete_since.is_none()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RevisionRow {
    pub(crate) file_id: String,
    pub(crate) revision_id: String,
    pub(crate) name: String,
    pub(crate) mime_type: String,
    pub(crate) size: Option<i64>,
    pub(crate) content_hash: Option<String>,
    pub(crate) can_download: bool,
    pub(crate) modified_time: i64,
    pub(crate) modified_by: Option<String>,
    pub(crate) obsolete_since: Option<i64>,
}
impl TryFrom<&Revision> for RevisionRow {
    type Error = Error;
    fn try_from(revision: &Revision) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: revision.file_id.clone(),
            revision_id: revision.revision_id.clone(),
            name: revision.name.clone(),
            mime_type: revision.mime_type.clone(),
            size: revision
                .size
                .map(i64::try_from)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("revision size"))?,
            content_hash: revision.content_hash.clone(),
            can_download: revision.can_download,
            modified_time: to_micros(revision.modified_time)?,
            modified_by: revision.modified_by.clone(),
            obsolete_since: opt_to_micros(revision.obsolete_since)?,
        })
    }
}
impl TryFrom<RevisionRow> for Revision {
    type Error = Error;
    fn try_from(row: RevisionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: row.file_id,
            revision_id: row.revision_id,
            name: row.name,
            mime_type: row.mime_type,
            size: row.size.map(u64::try_from).transpose().or_raise(|| ErrorKind::InvalidData("revision size"))?,
            content_hash: row.content_hash,
            can_download: row.can_download,
            modified_time: from_micros(row.modified_time)?,
            modified_by: row.modified_by,
            obsolete_since: opt_from_micros(row.obsolete_since)?,
        })
    }
}
