// src/storage/state.rs

//! Per-source index-refresh timestamps.
//!
//! A source is re-indexed only when its refresh interval has elapsed since
//! the last successful listing. The state is advisory: an unreadable file
//! just means every source is due.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

pub struct RunState {
    path: PathBuf,
    last_indexed: HashMap<String, DateTime<Utc>>,
}

impl RunState {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_indexed = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!(
                    "Run state at {} is unreadable ({e}); re-indexing all sources",
                    path.display()
                );
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { path, last_indexed }
    }

    /// Whether the source's refresh interval has elapsed.
    pub fn is_due(&self, source: &str, interval: Duration) -> bool {
        match self.last_indexed.get(source) {
            None => true,
            Some(at) => {
                let elapsed = Utc::now().signed_duration_since(*at);
                elapsed >= chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX)
            }
        }
    }

    /// Record a successful listing of the source's index.
    pub fn mark_indexed(&mut self, source: &str) {
        self.last_indexed.insert(source.to_string(), Utc::now());
    }

    /// Persist the timestamps, atomically.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&self.last_indexed)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
