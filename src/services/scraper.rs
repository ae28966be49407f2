// src/services/scraper.rs

//! The polymorphic contract each document source implements.
//!
//! The engine is generic over this interface and never special-cases a source
//! by name; site-specific markup handling lives entirely inside the
//! implementations, which are supplied by the surrounding system.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{RetryPolicy, SourceSettings};

/// Per-source configuration, immutable for a run.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    /// Source name, also the `source` field of its documents
    pub name: String,

    /// Cap on simultaneous whole-document fetch units for this source
    pub concurrency: usize,

    /// Minimum interval between re-indexing this source
    pub index_refresh: Duration,

    /// Retry policy override for this source
    pub retry: Option<RetryPolicy>,

    /// CSS selectors for intra-document artifacts the source injects into its
    /// HTML (inline history notes, navigation chrome) that must be stripped
    /// before text extraction
    pub artifact_selectors: Vec<String>,
}

impl SourceDescriptor {
    const DEFAULT_CONCURRENCY: usize = 30;
    const DEFAULT_REFRESH_DAYS: u64 = 14;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: Self::DEFAULT_CONCURRENCY,
            index_refresh: Duration::from_secs(Self::DEFAULT_REFRESH_DAYS * 24 * 60 * 60),
            retry: None,
            artifact_selectors: Vec::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_index_refresh(mut self, interval: Duration) -> Self {
        self.index_refresh = interval;
        self
    }

    pub fn with_artifact_selectors(mut self, selectors: Vec<String>) -> Self {
        self.artifact_selectors = selectors;
        self
    }

    /// Apply configuration overrides on top of the scraper's defaults.
    pub fn apply_settings(&mut self, settings: &SourceSettings) {
        if let Some(concurrency) = settings.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(days) = settings.index_refresh_days {
            self.index_refresh = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(retry) = &settings.retry {
            self.retry = Some(retry.clone());
        }
    }
}

/// One entry of a source's document index: an identifier plus whatever
/// lightweight metadata the listing exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocEntry {
    /// Source-qualified document id
    pub id: String,

    /// URL the document is fetched from, when meaningful for the source
    pub url: Option<String>,

    /// Source-declared version marker, when the index exposes one
    pub version_hint: Option<String>,

    pub date: Option<String>,
    pub citation: Option<String>,
    pub jurisdiction: Option<String>,
    pub doc_type: Option<String>,
}

impl DocEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            version_hint: None,
            date: None,
            citation: None,
            jurisdiction: None,
            doc_type: None,
        }
    }
}

/// Raw content of a fetched document before extraction.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    /// Declared content type
    pub mime: String,
}

impl RawDocument {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }
}

/// A document source.
///
/// `fetch_document` must perform every network call needed to materialize one
/// document (redirects, binary attachments) inside the single invocation: the
/// whole call runs under one fetch-pool permit, so sub-requests are never
/// bounded separately.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// The source's default descriptor; config may override per name.
    fn descriptor(&self) -> SourceDescriptor;

    /// Enumerate the documents the source currently exposes.
    ///
    /// Finite per invocation; re-queried on each refresh cycle.
    async fn list_documents(&self) -> Result<Vec<DocEntry>>;

    /// Retrieve one document's raw content and declared MIME.
    ///
    /// Implementations surface `AppError::NotFound` for missing documents and
    /// `AppError::Unavailable` for source-declared "content unavailable"
    /// markers.
    async fn fetch_document(&self, entry: &DocEntry) -> Result<RawDocument>;

    /// Locate an alternate rendition (PDF/DOCX) for documents whose primary
    /// format has no extractor. Sources without alternates keep the default.
    async fn fetch_alternate(&self, entry: &DocEntry) -> Result<Option<RawDocument>> {
        let _ = entry;
        Ok(None)
    }
}

/// Opaque OCR capability supplied by the surrounding system.
///
/// CPU/memory-bound; the engine runs it on the blocking pool under the global
/// OCR permit bound and treats the internals as a black box.
pub trait OcrEngine: Send + Sync {
    /// Render a PDF and recognize its text.
    fn pdf_to_text(&self, bytes: &[u8]) -> std::result::Result<String, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults() {
        let desc = SourceDescriptor::new("high_court_of_australia");
        assert_eq!(desc.concurrency, 30);
        assert_eq!(desc.index_refresh, Duration::from_secs(14 * 24 * 60 * 60));
        assert!(desc.retry.is_none());
    }

    #[test]
    fn settings_override_descriptor() {
        let mut desc = SourceDescriptor::new("federal_court_of_australia");
        desc.apply_settings(&SourceSettings {
            name: "federal_court_of_australia".to_string(),
            concurrency: Some(10),
            index_refresh_days: Some(7),
            retry: None,
        });
        assert_eq!(desc.concurrency, 10);
        assert_eq!(desc.index_refresh, Duration::from_secs(7 * 24 * 60 * 60));
    }
}
