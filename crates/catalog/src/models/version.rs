use super::{from_micros, opt_from_micros, opt_to_micros, to_micros};
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use std::collections::BTreeSet;
use time::UtcDateTime;

/// One exported state of an exportable document.
///
/// Keyed by `(file_id, modified_time)`: the remote offers no revision ids
/// for documents, so a new modification time is a new version. Each version
/// has one blob per extension in `extensions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedVersion {
    pub file_id: String,
    pub modified_time: UtcDateTime,
    pub name: String,
    pub mime_type: String,
    pub modified_by: Option<String>,
    pub can_export: bool,
    /// Extensions actually exported for this version.
    pub extensions: BTreeSet<String>,
    pub obsolete_since: Option<UtcDateTime>,
}
impl ExportedVersion {
    /// Name of the blob holding this version exported as `extension`.
    ///
    /// The timestamp is rendered as `YYYYmmdd_HHMMSSffffff`.
    ///
    /// ```
    /// # use lake_catalog::models::ExportedVersion;
    /// # use time::macros::utc_datetime;
    /// let version = ExportedVersion {
    ///     file_id: "doc".to_string(),
    ///     modified_time: utc_datetime!(2024-03-05 07:08:09.012345),
    ///     name: "Plan".to_string(),
    ///     mime_type: "application/vnd.google-apps.document".to_string(),
    ///     modified_by: None,
    ///     can_export: true,
    ///     extensions: ["pdf".to_string()].into(),
    ///     obsolete_since: None,
    /// };
    /// assert_eq!(version.blob_name("pdf"), "doc_20240305_070809012345.pdf");
    /// ```
    pub fn blob_name(&self, extension: &str) -> String {
        let t = self.modified_time;
        format!(
            "{}_{:04}{:02}{:02}_{:02}{:02}{:02}{:06}.{}",
            self.file_id,
            t.year(),
            u8::from(t.month()),
            t.day(),
            t.hour(),
            t.minute(),
            t.second(),
            t.microsecond(),
            extension
        )
    }

    /// Names of all blobs belonging to this version, one per extension.
    pub fn blob_names(&self) -> Vec<String> {
        self.extensions.iter().map(|ext| self.blob_name(ext)).collect()
    }

    pub fn is_live(&self) -> bool {
        self.obsolete_since.is_none()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct VersionRow {
    pub(crate) file_id: String,
    pub(crate) modified_time: i64,
    pub(crate) name: String,
    pub(crate) mime_type: String,
    pub(crate) modified_by: Option<String>,
    pub(crate) can_export: bool,
    /// JSON array.
    pub(crate) extensions: String,
    pub(crate) obsolete_since: Option<i64>,
}
impl TryFrom<&ExportedVersion> for VersionRow {
    type Error = Error;
    fn try_from(version: &ExportedVersion) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: version.file_id.clone(),
            modified_time: to_micros(version.modified_time)?,
            name: version.name.clone(),
            mime_type: version.mime_type.clone(),
            modified_by: version.modified_by.clone(),
            can_export: version.can_export,
            extensions: serde_json::to_string(&version.extensions).or_raise(|| ErrorKind::InvalidData("extensions"))?,
            obsolete_since: opt_to_micros(version.obsolete_since)?,
        })
    }
}
impl TryFrom<VersionRow> for ExportedVersion {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: row.file_id,
            modified_time: from_micros(row.modified_time)?,
            name: row.name,
            mime_type: row.mime_type,
            modified_by: row.modified_by,
            can_export: row.can_export,
            extensions: serde_json::from_str(&row.extensions).or_raise(|| ErrorKind::InvalidData("extensions"))?,
            obsolete_since: opt_from_micros(row.obsolete_since)?,
        })
    }
}
