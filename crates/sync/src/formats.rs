//! Export format negotiation.
//!
//! Documents are materialized in every format that is both configured by the
//! operator and offered by the remote for the document's type.

use lake_remote::{EXPORTABLE_MIME_PREFIX, ExportFormat, SupportedFormats};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

/// Configured export formats, keyed by full document MIME type.
pub type Preferences = BTreeMap<String, BTreeSet<ExportFormat>>;

static NOT_ALLOWED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z,:.\n]").unwrap());

/// Parse `type: ext,ext` lines into [`Preferences`].
///
/// Input is lowercased and anything outside `a-z , : .` and newlines is
/// dropped, so whitespace is free. Lines that don't have exactly one `:` are
/// ignored. Types are short document type names and get the exportable MIME
/// prefix.
///
/// ```
/// use lake_sync::parse_preferences;
/// let prefs = parse_preferences("Document: PDF, docx\nnonsense\nspreadsheet: xlsx,,\n");
/// let doc = &prefs["application/vnd.google-apps.document"];
/// let extensions: Vec<_> = doc.iter().map(|f| f.extension.as_str()).collect();
/// assert_eq!(extensions, ["docx", "pdf"]);
/// assert_eq!(prefs["application/vnd.google-apps.spreadsheet"].len(), 1);
/// assert_eq!(prefs.len(), 2);
/// ```
pub fn parse_preferences(text: &str) -> Preferences {
    let cleaned = NOT_ALLOWED.replace_all(&text.to_lowercase(), "").into_owned();
    let mut preferences = Preferences::new();
    for line in cleaned.lines() {
        if line.matches(':').count() != 1 {
            continue;
        }
        let Some((kind, extensions)) = line.split_once(':') else {
            continue;
        };
        let formats = extensions.split(',').filter(|ext| !ext.is_empty()).map(ExportFormat::from_extension);
        preferences.entry(format!("{EXPORTABLE_MIME_PREFIX}{kind}")).or_default().extend(formats);
    }
    preferences
}

/// Formats to export per document type, fixed for one pass.
#[derive(Debug, Clone, Default)]
pub struct FormatNegotiator {
    chosen: HashMap<String, Vec<ExportFormat>>,
    unsupported: BTreeMap<String, BTreeSet<String>>,
}

impl FormatNegotiator {
    /// Intersect what the remote supports with what is configured.
    ///
    /// Configured formats the remote doesn't offer are logged here, once,
    /// and otherwise ignored.
    pub fn new(supported: &SupportedFormats, preferences: &Preferences) -> Self {
        let mut chosen = HashMap::new();
        let mut unsupported = BTreeMap::new();
        for (mime_type, wanted) in preferences {
            let offered = supported.get(mime_type);
            let mut formats = Vec::new();
            let mut missing = BTreeSet::new();
            for format in wanted {
                // Match on extension: the remote's own format is the one it
                // accepts back in an export request.
                match offered.and_then(|offered| offered.iter().find(|o| o.extension == format.extension)) {
                    Some(offer) => formats.push(offer.clone()),
                    None => {
                        missing.insert(format.extension.clone());
                    },
                }
            }
            if !missing.is_empty() {
                tracing::warn!(mime_type = %mime_type, unsupported = ?missing, "Unsupported export format(s) for type");
                unsupported.insert(mime_type.clone(), missing);
            }
            formats.sort();
            formats.dedup_by(|a, b| a.extension == b.extension);
            chosen.insert(mime_type.clone(), formats);
        }
        Self { chosen, unsupported }
    }

    /// Formats to export documents of this type in, sorted by extension.
    pub fn formats_for(&self, mime_type: &str) -> &[ExportFormat] {
        self.chosen.get(mime_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn extensions_for(&self, mime_type: &str) -> BTreeSet<String> {
        self.formats_for(mime_type).iter().map(|f| f.extension.clone()).collect()
    }

    /// Configured extensions the remote doesn't offer, per type.
    pub fn unsupported(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.unsupported
    }
}
