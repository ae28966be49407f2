// src/storage/corpus.rs

//! The on-disk corpus and its single writer.
//!
//! Read-first discipline: the whole JSONL file is loaded and reconciled in
//! memory before any network activity starts. Undecodable lines and records
//! failing validation are dropped on load, which forces a re-fetch of their
//! ids this run; duplicate ids keep the most recently scraped record.
//! Successful merges are appended immediately so a crash loses only
//! unflushed work, and the file is rewritten (atomically, via a temp file)
//! only when the reconciled set actually differs from what is on disk.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Document;

pub struct CorpusStore {
    path: PathBuf,
    records: HashMap<String, Document>,
    /// In-memory set differs from the on-disk lines; a flush must rewrite.
    dirty: bool,
}

impl CorpusStore {
    /// Load and reconcile the corpus file. A missing file is an empty corpus;
    /// any other read failure is fatal.
    pub async fn load(path: impl Into<PathBuf>, min_content_chars: usize) -> Result<Self> {
        let path = path.into();
        let mut records: HashMap<String, Document> = HashMap::new();
        let mut dirty = false;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(AppError::Io(e)),
        };

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let doc: Document = match serde_json::from_str(line) {
                Ok(doc) => doc,
                Err(e) => {
                    log::warn!(
                        "Dropping undecodable corpus record at line {}: {e}",
                        line_no + 1
                    );
                    dirty = true;
                    continue;
                }
            };
            if let Err(reason) = doc.validate(min_content_chars) {
                log::warn!(
                    "Dropping corrupted corpus record '{}' ({reason}); it will be re-fetched",
                    doc.id
                );
                dirty = true;
                continue;
            }
            match records.entry(doc.id.clone()) {
                std::collections::hash_map::Entry::Occupied(mut existing) => {
                    log::warn!("Duplicate corpus id '{}'; keeping the most recent", doc.id);
                    dirty = true;
                    if doc.when_scraped >= existing.get().when_scraped {
                        existing.insert(doc);
                    }
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(doc);
                }
            }
        }

        log::info!(
            "Loaded {} corpus records from {}",
            records.len(),
            path.display()
        );
        Ok(Self {
            path,
            records,
            dirty,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record counts per source, for reporting.
    pub fn count_by_source(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for doc in self.records.values() {
            *counts.entry(doc.source.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Merge one ingested document and append it to the file.
    ///
    /// An append is durable on its own for new ids; replacing an existing id
    /// leaves a stale line behind, so the store becomes dirty and the
    /// end-of-run flush rewrites.
    pub async fn merge(&mut self, doc: Document) -> Result<()> {
        let line = serde_json::to_string(&doc)?;
        let replaced = self.records.insert(doc.id.clone(), doc).is_some();
        if replaced {
            self.dirty = true;
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// Drop this source's records whose ids the source no longer lists.
    /// Call only after a successful listing.
    pub fn remove_absent(&mut self, source: &str, listed: &HashSet<String>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|id, doc| doc.source != source || listed.contains(id));
        let removed = before - self.records.len();
        if removed > 0 {
            log::info!("{source}: removed {removed} records no longer listed");
            self.dirty = true;
        }
        removed
    }

    /// Rewrite the corpus file if the reconciled set differs from disk.
    ///
    /// Records are written one JSON object per line, ordered by id; the new
    /// file replaces the old one atomically so readers never observe a
    /// half-written corpus.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut docs: Vec<&Document> = self.records.values().collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        let mut out = String::new();
        for doc in docs {
            out.push_str(&serde_json::to_string(doc)?);
            out.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(out.as_bytes()).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        log::info!(
            "Rewrote corpus: {} records at {}",
            self.records.len(),
            self.path.display()
        );
        self.dirty = false;
        Ok(())
    }
}
