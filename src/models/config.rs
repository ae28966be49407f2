//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Corpus and data-directory paths
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry/backoff policy applied to outbound requests
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Text normalization settings
    #[serde(default)]
    pub cleaning: CleaningConfig,

    /// Maximum number of documents that may be OCR'd concurrently
    #[serde(default = "defaults::max_concurrent_ocr")]
    pub max_concurrent_ocr: usize,

    /// Per-source overrides (matched to scrapers by name)
    #[serde(default)]
    pub sources: Vec<SourceSettings>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.max_concurrent_ocr == 0 {
            return Err(AppError::validation("max_concurrent_ocr must be > 0"));
        }
        if self.retry.max_retries == 0 {
            return Err(AppError::validation("retry.max_retries must be > 0"));
        }
        if self.cleaning.min_content_chars == 0 {
            return Err(AppError::validation(
                "cleaning.min_content_chars must be > 0",
            ));
        }
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AppError::validation("sources entry has an empty name"));
            }
            if source.concurrency == Some(0) {
                return Err(AppError::validation(format!(
                    "sources.{}.concurrency must be > 0",
                    source.name
                )));
            }
        }
        Ok(())
    }

    /// Per-source settings by scraper name, if configured.
    pub fn source_settings(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.name == name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus: CorpusConfig::default(),
            http: HttpConfig::default(),
            retry: RetryPolicy::default(),
            cleaning: CleaningConfig::default(),
            max_concurrent_ocr: defaults::max_concurrent_ocr(),
            sources: Vec::new(),
        }
    }
}

/// Corpus file and data-directory locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Path of the reconciled corpus file
    #[serde(default = "defaults::corpus_path")]
    pub path: PathBuf,

    /// Directory for run state (per-source index-refresh timestamps)
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: defaults::corpus_path(),
            data_dir: defaults::data_dir(),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Retry/backoff policy for outbound requests.
///
/// Pure configuration, no mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts before giving up
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on a single backoff delay, in milliseconds
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Hard ceiling on total time spent waiting between attempts
    #[serde(default = "defaults::max_total_wait_ms")]
    pub max_total_wait_ms: u64,

    /// HTTP statuses that trigger a retry
    #[serde(default = "defaults::retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    /// Whether the given HTTP status should be retried.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_total_wait(&self) -> Duration {
        Duration::from_millis(self.max_total_wait_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            max_total_wait_ms: defaults::max_total_wait_ms(),
            retryable_statuses: defaults::retryable_statuses(),
        }
    }
}

/// Text normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Minimum number of alphabetic characters a document must retain after
    /// cleaning; shorter documents are near-certainly placeholder pages
    #[serde(default = "defaults::min_content_chars")]
    pub min_content_chars: usize,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            min_content_chars: defaults::min_content_chars(),
        }
    }
}

/// Per-source overrides applied on top of a scraper's own descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Scraper name this entry applies to
    pub name: String,

    /// Cap on simultaneous fetch units for this source
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Minimum days between re-indexing this source
    #[serde(default)]
    pub index_refresh_days: Option<u64>,

    /// Retry policy override for this source
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

mod defaults {
    use std::path::PathBuf;

    // Corpus defaults
    pub fn corpus_path() -> PathBuf {
        PathBuf::from("corpus.jsonl")
    }
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    // HTTP defaults
    pub fn user_agent() -> String {
        // A common desktop browser string; some legal databases refuse
        // obviously non-browser agents.
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Retry defaults
    pub fn max_retries() -> u32 {
        5
    }
    pub fn base_delay_ms() -> u64 {
        1_000
    }
    pub fn max_delay_ms() -> u64 {
        150_000
    }
    pub fn max_total_wait_ms() -> u64 {
        900_000
    }
    pub fn retryable_statuses() -> Vec<u16> {
        vec![429, 500, 502, 503, 504]
    }

    // OCR defaults
    pub fn max_concurrent_ocr() -> usize {
        1
    }

    // Cleaning defaults
    pub fn min_content_chars() -> usize {
        9
    }
}
