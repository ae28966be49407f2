// src/pipeline/run.rs

//! The run orchestrator.
//!
//! For each source whose index-refresh interval has elapsed, lists the
//! index, reconciles records the source no longer exposes, then fans out one
//! unit of work per listed document: acquire the source's fetch permit,
//! fetch, extract, clean, detect change. Completions flow back through a
//! merge queue consumed sequentially, so the corpus store has exactly one
//! writer and a crash mid-run loses only unflushed work. Per-document
//! failures never cancel sibling units; a listing failure abandons only that
//! source for the run.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{Config, Document, FetchOutcome, RunReport, SkipReason, SourceReport};
use crate::pipeline::clean::clean_text;
use crate::pipeline::extract::Extractor;
use crate::pipeline::version::{ChangeKind, classify, fingerprint};
use crate::services::{Coordinator, DocEntry, OcrEngine, Scraper, SourceDescriptor};
use crate::storage::{CorpusStore, RunState};

/// The stored fields a unit of work needs before fetching. Snapshotted at
/// scheduling time; ids are unique within a source, so sibling merges cannot
/// invalidate a snapshot.
#[derive(Debug, Clone)]
struct StoredView {
    version_id: String,
    source_version: Option<String>,
}

/// One completed unit of work, consumed by the merge loop.
struct UnitResult {
    entry: DocEntry,
    outcome: FetchOutcome,
    document: Option<Document>,
    warnings: Vec<String>,
}

/// Drives scraping runs and owns the concurrency pools.
pub struct Orchestrator {
    config: Config,
    coordinator: Arc<Coordinator>,
    extractor: Arc<Extractor>,
}

impl Orchestrator {
    pub fn new(config: Config, ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        let coordinator = Arc::new(Coordinator::new(config.max_concurrent_ocr));
        let extractor = Arc::new(Extractor::new(Arc::clone(&coordinator), ocr));
        Self {
            config,
            coordinator,
            extractor,
        }
    }

    /// Run every due source and reconcile the corpus.
    ///
    /// With `force_refresh`, refresh intervals are ignored and every source
    /// is re-indexed. Corpus store I/O failures are fatal and abort the run;
    /// the previous corpus file is left in place.
    pub async fn run(
        &self,
        scrapers: &[Arc<dyn Scraper>],
        force_refresh: bool,
    ) -> Result<RunReport> {
        let min_content = self.config.cleaning.min_content_chars;
        let mut store = CorpusStore::load(&self.config.corpus.path, min_content).await?;
        let state_path = self.config.corpus.data_dir.join("index_state.json");
        let mut state = RunState::load(&state_path).await;

        let mut report = RunReport::default();

        for scraper in scrapers {
            let mut descriptor = scraper.descriptor();
            if let Some(settings) = self.config.source_settings(&descriptor.name) {
                descriptor.apply_settings(settings);
            }

            if !force_refresh && !state.is_due(&descriptor.name, descriptor.index_refresh) {
                log::info!(
                    "{}: index refreshed within the last {:?}, skipping",
                    descriptor.name,
                    descriptor.index_refresh
                );
                continue;
            }

            let source_report = self
                .run_source(scraper, &descriptor, &mut store, min_content)
                .await?;
            if source_report.index_error.is_none() {
                state.mark_indexed(&descriptor.name);
            }
            log_source_summary(&source_report);
            report.sources.push(source_report);
        }

        store.flush().await?;
        state.save().await?;
        log_run_summary(&report);
        Ok(report)
    }

    async fn run_source(
        &self,
        scraper: &Arc<dyn Scraper>,
        descriptor: &SourceDescriptor,
        store: &mut CorpusStore,
        min_content: usize,
    ) -> Result<SourceReport> {
        let mut report = SourceReport::new(&descriptor.name);
        self.coordinator
            .register_source(&descriptor.name, descriptor.concurrency);

        let entries = match scraper.list_documents().await {
            Ok(entries) => entries,
            Err(error) => {
                log::error!("{}: index listing failed: {error}", descriptor.name);
                report.index_error = Some(error.to_string());
                return Ok(report);
            }
        };
        log::info!("{}: listed {} documents", descriptor.name, entries.len());

        let listed: HashSet<String> = entries.iter().map(|e| e.id.clone()).collect();
        report.removed = store.remove_absent(&descriptor.name, &listed);

        let jobs: Vec<(DocEntry, Option<StoredView>)> = entries
            .into_iter()
            .map(|entry| {
                let stored = store.get(&entry.id).map(|doc| StoredView {
                    version_id: doc.version_id.clone(),
                    source_version: doc.source_version.clone(),
                });
                (entry, stored)
            })
            .collect();

        let mut completions = stream::iter(jobs)
            .map(|(entry, stored)| {
                let scraper = Arc::clone(scraper);
                let coordinator = Arc::clone(&self.coordinator);
                let extractor = Arc::clone(&self.extractor);
                let descriptor = descriptor.clone();
                async move {
                    process_entry(
                        scraper,
                        coordinator,
                        extractor,
                        descriptor,
                        entry,
                        stored,
                        min_content,
                    )
                    .await
                }
            })
            .buffer_unordered(descriptor.concurrency.max(1));

        while let Some(unit) = completions.next().await {
            report.record(&unit.outcome);
            report.warnings.extend(unit.warnings);
            match &unit.outcome {
                FetchOutcome::Skipped(reason) => {
                    log::warn!("{}: skipped {}: {reason}", descriptor.name, unit.entry.id);
                }
                FetchOutcome::Failed(reason) => {
                    log::warn!("{}: failed {}: {reason}", descriptor.name, unit.entry.id);
                }
                _ => {}
            }
            if let Some(document) = unit.document {
                store.merge(document).await?;
            }
        }

        Ok(report)
    }
}

/// One bounded unit of work: permit, fetch, extract, clean, detect. Every
/// error is converted to an outcome here; nothing propagates to siblings.
async fn process_entry(
    scraper: Arc<dyn Scraper>,
    coordinator: Arc<Coordinator>,
    extractor: Arc<Extractor>,
    descriptor: SourceDescriptor,
    entry: DocEntry,
    stored: Option<StoredView>,
    min_content: usize,
) -> UnitResult {
    // A source-declared version marker equal to the stored one means the
    // content cannot have changed; skip the fetch entirely.
    if let (Some(hint), Some(stored_view)) = (&entry.version_hint, &stored) {
        if stored_view.source_version.as_deref() == Some(hint.as_str()) {
            return UnitResult {
                entry,
                outcome: FetchOutcome::Unchanged,
                document: None,
                warnings: Vec::new(),
            };
        }
    }

    let permit = match coordinator.fetch_permit(&descriptor.name).await {
        Ok(permit) => permit,
        Err(error) => {
            return UnitResult {
                outcome: FetchOutcome::Failed(error.to_string()),
                entry,
                document: None,
                warnings: Vec::new(),
            };
        }
    };
    let result = fetch_and_detect(
        &*scraper,
        &extractor,
        &descriptor,
        &entry,
        stored.as_ref(),
        min_content,
    )
    .await;
    drop(permit);

    match result {
        Ok((outcome, document, warnings)) => UnitResult {
            entry,
            outcome,
            document,
            warnings,
        },
        Err(AppError::NoExtractableFormat(detail)) => UnitResult {
            warnings: vec![format!("{}: {detail}", entry.id)],
            outcome: FetchOutcome::Skipped(SkipReason::NoExtractableFormat(detail)),
            entry,
            document: None,
        },
        Err(error) => UnitResult {
            outcome: FetchOutcome::Failed(error.to_string()),
            entry,
            document: None,
            warnings: Vec::new(),
        },
    }
}

async fn fetch_and_detect(
    scraper: &dyn Scraper,
    extractor: &Extractor,
    descriptor: &SourceDescriptor,
    entry: &DocEntry,
    stored: Option<&StoredView>,
    min_content: usize,
) -> Result<(FetchOutcome, Option<Document>, Vec<String>)> {
    let raw = scraper.fetch_document(entry).await?;
    let mut extracted = extractor
        .extract(scraper, entry, raw, &descriptor.artifact_selectors)
        .await;

    // Overloaded servers can return 200 with a truncated or malformed body;
    // one fresh fetch is allowed before a parse failure is terminal.
    if matches!(&extracted, Err(e) if e.is_parse()) {
        log::debug!(
            "{}: parse failure for {}, re-fetching once",
            descriptor.name,
            entry.id
        );
        let raw = scraper.fetch_document(entry).await?;
        extracted = extractor
            .extract(scraper, entry, raw, &descriptor.artifact_selectors)
            .await;
    }
    let extracted = extracted?;

    // Fingerprint the raw extraction so cleaning-rule changes alone never
    // churn the corpus.
    let fresh = fingerprint(&extracted.text);
    let text = clean_text(&extracted.text);
    let alphabetic = Document::alphabetic_len(&text);
    if alphabetic < min_content {
        return Ok((
            FetchOutcome::Skipped(SkipReason::BelowMinimumContent {
                alphabetic_chars: alphabetic,
            }),
            None,
            extracted.warnings,
        ));
    }

    match classify(stored.map(|s| s.version_id.as_str()), &fresh) {
        ChangeKind::Unchanged => Ok((FetchOutcome::Unchanged, None, extracted.warnings)),
        kind => {
            let document = Document {
                id: entry.id.clone(),
                source: descriptor.name.clone(),
                version_id: fresh,
                source_version: entry.version_hint.clone(),
                mime: extracted.mime.clone(),
                date: entry.date.clone(),
                citation: entry.citation.clone(),
                jurisdiction: entry.jurisdiction.clone(),
                doc_type: entry.doc_type.clone(),
                text,
                when_scraped: Utc::now(),
            };
            let outcome = match kind {
                ChangeKind::Added => FetchOutcome::Added,
                _ => FetchOutcome::Updated,
            };
            Ok((outcome, Some(document), extracted.warnings))
        }
    }
}

fn log_source_summary(report: &SourceReport) {
    if report.index_error.is_some() {
        return;
    }
    log::info!(
        "{}: {} added, {} updated, {} unchanged, {} skipped, {} failed, {} removed",
        report.source,
        report.added,
        report.updated,
        report.unchanged,
        report.skipped,
        report.failed,
        report.removed
    );
    for warning in &report.warnings {
        log::warn!("{}: {warning}", report.source);
    }
}

fn log_run_summary(report: &RunReport) {
    log::info!(
        "Run complete: {} added, {} updated, {} unchanged, {} skipped, {} failed across {} sources",
        report.total(|s| s.added),
        report.total(|s| s.updated),
        report.total(|s| s.unchanged),
        report.total(|s| s.skipped),
        report.total(|s| s.failed),
        report.sources.len()
    );
    if report.has_source_failures() {
        let failed = report
            .sources
            .iter()
            .filter(|s| s.index_error.is_some())
            .count();
        log::warn!("{failed} source(s) failed to list their index this run");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::services::RawDocument;

    const A1_HTML: &str =
        "<html><body><p>Act No. 1 of 2024. An Act to consolidate the criminal law.</p></body></html>";
    const A1_AMENDED: &str =
        "<html><body><p>Act No. 1 of 2024. An Act to consolidate the criminal law, as amended.</p></body></html>";
    const A2_BLANK: &str = "<html><body><p>   </p></body></html>";

    struct FakeSource {
        descriptor: SourceDescriptor,
        pages: Mutex<HashMap<String, (String, String)>>,
        hints: Mutex<HashMap<String, String>>,
        garbage_first: Mutex<HashSet<String>>,
        fail_listing: bool,
        fetch_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(name: &str, pages: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                descriptor: SourceDescriptor::new(name).with_concurrency(4),
                pages: Mutex::new(
                    pages
                        .iter()
                        .map(|(id, html)| {
                            (id.to_string(), (html.to_string(), "text/html".to_string()))
                        })
                        .collect(),
                ),
                hints: Mutex::new(HashMap::new()),
                garbage_first: Mutex::new(HashSet::new()),
                fail_listing: false,
                fetch_calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            let mut source = Self::new(name, &[]);
            Arc::get_mut(&mut source).unwrap().fail_listing = true;
            source
        }

        fn set_page(&self, id: &str, html: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(id.to_string(), (html.to_string(), "text/html".to_string()));
        }

        fn set_page_with_mime(&self, id: &str, body: &str, mime: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(id.to_string(), (body.to_string(), mime.to_string()));
        }

        fn remove_page(&self, id: &str) {
            self.pages.lock().unwrap().remove(id);
        }

        fn set_hint(&self, id: &str, hint: &str) {
            self.hints
                .lock()
                .unwrap()
                .insert(id.to_string(), hint.to_string());
        }

        fn garbage_on_first_fetch(&self, id: &str) {
            self.garbage_first.lock().unwrap().insert(id.to_string());
        }

        fn fetches(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Scraper for FakeSource {
        fn descriptor(&self) -> SourceDescriptor {
            self.descriptor.clone()
        }

        async fn list_documents(&self) -> Result<Vec<DocEntry>> {
            if self.fail_listing {
                return Err(AppError::index(&self.descriptor.name, "status 503"));
            }
            let pages = self.pages.lock().unwrap();
            let hints = self.hints.lock().unwrap();
            let mut ids: Vec<String> = pages.keys().cloned().collect();
            ids.sort();
            Ok(ids
                .into_iter()
                .map(|id| {
                    let mut entry = DocEntry::new(&id);
                    entry.version_hint = hints.get(&id).cloned();
                    entry
                })
                .collect())
        }

        async fn fetch_document(&self, entry: &DocEntry) -> Result<RawDocument> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.garbage_first.lock().unwrap().remove(&entry.id) {
                return Ok(RawDocument::new(
                    b"%PDF-1.7 truncated".to_vec(),
                    "application/pdf",
                ));
            }
            let pages = self.pages.lock().unwrap();
            let (body, mime) = pages
                .get(&entry.id)
                .ok_or_else(|| AppError::not_found(entry.id.clone()))?;
            Ok(RawDocument::new(body.clone().into_bytes(), mime.clone()))
        }
    }

    fn test_config(tmp: &TempDir) -> Config {
        let mut config = Config::default();
        config.corpus.path = tmp.path().join("corpus.jsonl");
        config.corpus.data_dir = tmp.path().join("data");
        config
    }

    #[tokio::test]
    async fn scenario_added_skipped_then_updated() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let source = FakeSource::new("source_a", &[("a1", A1_HTML), ("a2", A2_BLANK)]);
        let scrapers = vec![source.clone() as Arc<dyn Scraper>];
        let orchestrator = Orchestrator::new(config.clone(), None);

        let report = orchestrator.run(&scrapers, false).await.unwrap();
        assert_eq!(report.sources[0].added, 1);
        assert_eq!(report.sources[0].skipped, 1);

        let store = CorpusStore::load(&config.corpus.path, 9).await.unwrap();
        let first_fingerprint = store.get("a1").unwrap().version_id.clone();
        assert!(store.get("a2").is_none());

        let report = orchestrator.run(&scrapers, true).await.unwrap();
        assert_eq!(report.sources[0].unchanged, 1);
        assert_eq!(report.sources[0].added, 0);
        assert_eq!(report.sources[0].skipped, 1);

        source.set_page("a1", A1_AMENDED);
        let report = orchestrator.run(&scrapers, true).await.unwrap();
        assert_eq!(report.sources[0].updated, 1);

        let store = CorpusStore::load(&config.corpus.path, 9).await.unwrap();
        assert_ne!(store.get("a1").unwrap().version_id, first_fingerprint);
    }

    #[tokio::test]
    async fn rerun_of_unchanged_source_leaves_corpus_untouched() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let source = FakeSource::new(
            "source_a",
            &[("a1", A1_HTML), ("a2", "<p>Another act with plenty of text.</p>")],
        );
        let scrapers = vec![source as Arc<dyn Scraper>];
        let orchestrator = Orchestrator::new(config.clone(), None);

        orchestrator.run(&scrapers, false).await.unwrap();
        let before = tokio::fs::read(&config.corpus.path).await.unwrap();

        let report = orchestrator.run(&scrapers, true).await.unwrap();
        assert_eq!(report.total(|s| s.added), 0);
        assert_eq!(report.total(|s| s.updated), 0);

        let after = tokio::fs::read(&config.corpus.path).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn corrupted_record_is_dropped_and_refetched() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let corrupt = serde_json::json!({
            "id": "a1",
            "source": "source_a",
            "versionId": "0123456789abcdef",
            "mime": "text/html",
            "text": "",
            "whenScraped": "2026-01-01T00:00:00Z"
        });
        tokio::fs::write(&config.corpus.path, format!("{corrupt}\n"))
            .await
            .unwrap();

        let source = FakeSource::new("source_a", &[("a1", A1_HTML)]);
        let orchestrator = Orchestrator::new(config.clone(), None);
        let report = orchestrator
            .run(&[source as Arc<dyn Scraper>], false)
            .await
            .unwrap();
        assert_eq!(report.sources[0].added, 1);

        let store = CorpusStore::load(&config.corpus.path, 9).await.unwrap();
        assert!(!store.get("a1").unwrap().text.is_empty());
    }

    #[tokio::test]
    async fn listing_failure_does_not_abort_other_sources() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let bad = FakeSource::failing("source_bad");
        let good = FakeSource::new("source_good", &[("g1", A1_HTML)]);
        let orchestrator = Orchestrator::new(config, None);

        let report = orchestrator
            .run(
                &[bad as Arc<dyn Scraper>, good as Arc<dyn Scraper>],
                false,
            )
            .await
            .unwrap();

        assert!(report.sources[0].index_error.is_some());
        assert_eq!(report.sources[1].added, 1);
        assert!(report.has_source_failures());
    }

    #[tokio::test]
    async fn absent_ids_are_removed_after_successful_listing() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let source = FakeSource::new(
            "source_a",
            &[("a1", A1_HTML), ("a2", "<p>A second act with enough words.</p>")],
        );
        let orchestrator = Orchestrator::new(config.clone(), None);
        let scrapers = vec![source.clone() as Arc<dyn Scraper>];

        orchestrator.run(&scrapers, false).await.unwrap();
        source.remove_page("a2");

        let report = orchestrator.run(&scrapers, true).await.unwrap();
        assert_eq!(report.sources[0].removed, 1);

        let store = CorpusStore::load(&config.corpus.path, 9).await.unwrap();
        assert!(store.get("a2").is_none());
        assert!(store.get("a1").is_some());
    }

    #[tokio::test]
    async fn parse_failure_gets_exactly_one_fresh_fetch() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let source = FakeSource::new("source_a", &[("a1", A1_HTML)]);
        source.garbage_on_first_fetch("a1");

        let orchestrator = Orchestrator::new(config, None);
        let report = orchestrator
            .run(&[source.clone() as Arc<dyn Scraper>], false)
            .await
            .unwrap();

        assert_eq!(report.sources[0].added, 1);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn persistent_parse_failure_is_terminal_after_one_refetch() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let source = FakeSource::new("source_a", &[]);
        source.set_page_with_mime("a1", "%PDF-1.7 truncated", "application/pdf");

        let orchestrator = Orchestrator::new(config, None);
        let report = orchestrator
            .run(&[source.clone() as Arc<dyn Scraper>], false)
            .await
            .unwrap();

        assert_eq!(report.sources[0].failed, 1);
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn matching_version_hint_skips_the_fetch() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let source = FakeSource::new("source_a", &[("a1", A1_HTML)]);
        source.set_hint("a1", "reprint-4");

        let orchestrator = Orchestrator::new(config, None);
        let scrapers = vec![source.clone() as Arc<dyn Scraper>];

        let report = orchestrator.run(&scrapers, false).await.unwrap();
        assert_eq!(report.sources[0].added, 1);
        assert_eq!(source.fetches(), 1);

        let report = orchestrator.run(&scrapers, true).await.unwrap();
        assert_eq!(report.sources[0].unchanged, 1);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn minimum_content_boundary_is_exact() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        // Default minimum is 9 alphabetic characters.
        let source = FakeSource::new(
            "source_a",
            &[
                ("eight", "<p>abcd efgh 123</p>"),
                ("nine", "<p>abcd efghi 123</p>"),
            ],
        );

        let orchestrator = Orchestrator::new(config.clone(), None);
        let report = orchestrator
            .run(&[source as Arc<dyn Scraper>], false)
            .await
            .unwrap();
        assert_eq!(report.sources[0].skipped, 1);
        assert_eq!(report.sources[0].added, 1);

        let store = CorpusStore::load(&config.corpus.path, 9).await.unwrap();
        assert!(store.get("eight").is_none());
        assert!(store.get("nine").is_some());
    }

    #[tokio::test]
    async fn fetch_failure_is_recorded_not_fatal() {
        struct Vanishing;

        #[async_trait]
        impl Scraper for Vanishing {
            fn descriptor(&self) -> SourceDescriptor {
                SourceDescriptor::new("source_a").with_concurrency(2)
            }
            async fn list_documents(&self) -> Result<Vec<DocEntry>> {
                Ok(vec![DocEntry::new("ghost")])
            }
            async fn fetch_document(&self, entry: &DocEntry) -> Result<RawDocument> {
                Err(AppError::not_found(entry.id.clone()))
            }
        }

        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let orchestrator = Orchestrator::new(config, None);
        let report = orchestrator
            .run(&[Arc::new(Vanishing) as Arc<dyn Scraper>], false)
            .await
            .unwrap();
        assert_eq!(report.sources[0].failed, 1);
        assert_eq!(report.sources[0].added, 0);
    }
}
