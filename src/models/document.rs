//! Corpus document record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document in the corpus.
///
/// Serialized as one self-describing JSON record per corpus line. `id`,
/// `source`, `versionId`, `text` and `whenScraped` are always present;
/// the remaining metadata fields vary by source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Source-qualified identifier, unique within the corpus
    pub id: String,

    /// Name of the originating scraper
    pub source: String,

    /// Content fingerprint of the last-ingested text (16 hex chars),
    /// recomputed on every successful fetch
    pub version_id: String,

    /// Version marker declared by the source, when one exists; used only to
    /// short-circuit unchanged documents before fetching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,

    /// Original content type before extraction
    pub mime: String,

    /// Source-declared document date (YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Source-declared citation or title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,

    /// Source-declared jurisdiction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,

    /// Source-declared document type
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    /// Normalized plain text, never empty
    pub text: String,

    /// Timestamp of the last successful ingestion
    pub when_scraped: DateTime<Utc>,
}

impl Document {
    /// Number of alphabetic characters in a document's text, the measure the
    /// minimum-content filter is defined over.
    pub fn alphabetic_len(text: &str) -> usize {
        text.chars().filter(|c| c.is_alphabetic()).count()
    }

    /// Check the record invariants a persisted document must satisfy.
    ///
    /// Records failing this are treated as corrupted: dropped from the corpus
    /// and re-fetched on the next run rather than silently republished.
    pub fn validate(&self, min_content_chars: usize) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("empty id".to_string());
        }
        if self.source.trim().is_empty() {
            return Err("empty source".to_string());
        }
        if self.version_id.len() != 16
            || !self
                .version_id
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(format!("malformed fingerprint '{}'", self.version_id));
        }
        if Self::alphabetic_len(&self.text) < min_content_chars {
            return Err("text below minimum content".to_string());
        }
        Ok(())
    }
}
