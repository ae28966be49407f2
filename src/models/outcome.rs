//! Per-document fetch outcomes and run reporting.

use std::fmt;

/// Why a document was skipped rather than ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Extracted text fell below the minimum-content threshold
    BelowMinimumContent { alphabetic_chars: usize },

    /// No rendition of the document could be extracted
    NoExtractableFormat(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BelowMinimumContent { alphabetic_chars } => {
                write!(f, "below minimum content ({alphabetic_chars} alphabetic chars)")
            }
            SkipReason::NoExtractableFormat(detail) => {
                write!(f, "no extractable format: {detail}")
            }
        }
    }
}

/// The outcome of one fetch unit of work. Transient; consumed by the
/// orchestrator to update the corpus and by reporting, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// First ingestion of this id
    Added,
    /// Content changed since the last ingestion
    Updated,
    /// Content fingerprint matches the stored record
    Unchanged,
    /// Document deliberately not ingested
    Skipped(SkipReason),
    /// Fetch or extraction failed terminally for this run
    Failed(String),
}

/// Aggregated outcome counts for one source.
#[derive(Debug, Clone, Default)]
pub struct SourceReport {
    pub source: String,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Records dropped because the source no longer lists them
    pub removed: usize,
    /// Listing the source's index failed; no documents were processed
    pub index_error: Option<String>,
    /// Warnings worth surfacing in the summary (DOC-only documents etc.)
    pub warnings: Vec<String>,
}

impl SourceReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Tally one document outcome.
    pub fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Added => self.added += 1,
            FetchOutcome::Updated => self.updated += 1,
            FetchOutcome::Unchanged => self.unchanged += 1,
            FetchOutcome::Skipped(_) => self.skipped += 1,
            FetchOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.added + self.updated + self.unchanged + self.skipped + self.failed
    }
}

/// Aggregated outcome counts for a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn total(&self, f: impl Fn(&SourceReport) -> usize) -> usize {
        self.sources.iter().map(f).sum()
    }

    /// Whether any source failed to list its index.
    pub fn has_source_failures(&self) -> bool {
        self.sources.iter().any(|s| s.index_error.is_some())
    }
}
