// src/pipeline/mod.rs

//! The per-document processing pipeline and the run orchestrator.
//!
//! - `extract`: MIME-dispatched raw text extraction
//! - `clean`: normalization of extracted text
//! - `version`: content fingerprinting and change classification
//! - `run`: the orchestrator composing fetch, extraction and the store

pub mod clean;
pub mod extract;
pub mod run;
pub mod version;

pub use extract::{ExtractedText, Extractor};
pub use run::Orchestrator;
pub use version::{ChangeKind, classify, fingerprint};
