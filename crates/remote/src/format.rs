//! Export formats.
//!
//! An exportable document has no bytes of its own; the remote converts it to
//! one of a handful of formats on request. A format is a MIME type plus the
//! file extension its blob is stored under.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

const OPENXML: &str = "application/vnd.openxmlformats-officedocument.";
const FALLBACK_MIME_TYPE: &str = "application/octet-stream";
const FALLBACK_EXTENSION: &str = "bin";

static MIME_TO_EXTENSION: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("application/epub+zip".to_string(), "epub"),
        ("application/pdf".to_string(), "pdf"),
        ("application/rtf".to_string(), "rtf"),
        ("application/vnd.google-apps.script+json".to_string(), "json"),
        ("application/vnd.oasis.opendocument.presentation".to_string(), "odp"),
        ("application/vnd.oasis.opendocument.spreadsheet".to_string(), "ods"),
        ("application/vnd.oasis.opendocument.text".to_string(), "odt"),
        (format!("{OPENXML}presentationml.presentation"), "pptx"),
        (format!("{OPENXML}spreadsheetml.sheet"), "xlsx"),
        (format!("{OPENXML}wordprocessingml.document"), "docx"),
        ("application/x-vnd.oasis.opendocument.spreadsheet".to_string(), "ots"),
        // Only offered for documents and spreadsheets, and always a bundle of
        // HTML pages.
        ("application/zip".to_string(), "html.zip"),
        ("image/jpeg".to_string(), "jpg"),
        ("image/png".to_string(), "png"),
        ("image/svg+xml".to_string(), "svg"),
        ("text/csv".to_string(), "csv"),
        ("text/html".to_string(), "html"),
        ("text/plain".to_string(), "txt"),
        ("text/tab-separated-values".to_string(), "tsv"),
    ])
});

static EXTENSION_TO_MIME: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| MIME_TO_EXTENSION.iter().map(|(mime, ext)| (*ext, mime.as_str())).collect());

static TRAILING_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new("[a-z]+$").unwrap());

/// A MIME type and the extension used for blobs exported in it.
///
/// Ordered by extension, which is the order formats are exported and
/// recorded in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportFormat {
    pub mime_type: String,
    /// Extension without the leading dot.
    pub extension: String,
    /// `false` when either half was guessed rather than looked up.
    pub known: bool,
}

impl ExportFormat {
    /// Look up a format by extension (a leading dot is ignored).
    ///
    /// ```
    /// use lake_remote::ExportFormat;
    /// let pdf = ExportFormat::from_extension(".pdf");
    /// assert_eq!(pdf.mime_type, "application/pdf");
    /// assert!(pdf.known);
    /// assert!(!ExportFormat::from_extension("xyz").known);
    /// ```
    pub fn from_extension(extension: &str) -> Self {
        let extension = extension.trim_start_matches('.');
        match EXTENSION_TO_MIME.get(extension) {
            Some(mime) => Self { mime_type: mime.to_string(), extension: extension.to_string(), known: true },
            None => Self {
                mime_type: FALLBACK_MIME_TYPE.to_string(),
                extension: extension.to_string(),
                known: false,
            },
        }
    }

    /// Look up a format by MIME type, guessing the extension from the last
    /// word of the subtype when the type isn't known.
    pub fn from_mime_type(mime_type: &str) -> Self {
        match MIME_TO_EXTENSION.get(mime_type) {
            Some(ext) => Self { mime_type: mime_type.to_string(), extension: ext.to_string(), known: true },
            None => {
                let extension = TRAILING_WORD.find(mime_type).map_or(FALLBACK_EXTENSION, |m| m.as_str());
                Self { mime_type: mime_type.to_string(), extension: extension.to_string(), known: false }
            },
        }
    }
}

impl Ord for ExportFormat {
    fn cmp(&self, other: &Self) -> Ordering {
        self.extension
            .cmp(&other.extension)
            .then_with(|| self.mime_type.cmp(&other.mime_type))
            .then_with(|| self.known.cmp(&other.known))
    }
}
impl PartialOrd for ExportFormat {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.extension, self.mime_type)
    }
}
