// src/error.rs

//! Unified error handling for the corpus engine.

use std::fmt;

use thiserror::Error;

/// Result type alias for corpus operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// A fetch gave up after exhausting its retry budget
    #[error("retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },

    /// Document does not exist at the source
    #[error("not found: {0}")]
    NotFound(String),

    /// Source declares the content unavailable
    #[error("content unavailable: {0}")]
    Unavailable(String),

    /// Downloaded content is unparseable; the server may have returned a
    /// truncated or malformed body, so one fresh fetch is warranted
    #[error("parse error: {0}")]
    Parse(String),

    /// Document has no rendition the pipeline can extract text from
    #[error("no extractable format: {0}")]
    NoExtractableFormat(String),

    /// OCR capability failed
    #[error("OCR error: {0}")]
    Ocr(String),

    /// Listing a source's document index failed
    #[error("index error for {source_id}: {message}")]
    Index { source_id: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a content-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an index error with source context.
    pub fn index(source: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Index {
            source_id: source.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the content was malformed rather than missing,
    /// so a single fresh fetch may recover it.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}
