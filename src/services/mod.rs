// src/services/mod.rs

//! Engine service seams: the scraper contract, the outbound request layer
//! and the concurrency coordinator.

pub mod coordinator;
pub mod request;
pub mod scraper;

pub use coordinator::Coordinator;
pub use request::{Fetched, RequestClient, Verdict};
pub use scraper::{DocEntry, OcrEngine, RawDocument, Scraper, SourceDescriptor};
