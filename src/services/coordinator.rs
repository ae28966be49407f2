// src/services/coordinator.rs

//! Bounded-permit pools for fetch and OCR work.
//!
//! Two independent pools: one per-source pool capping simultaneous
//! whole-document fetch units (the permit wraps fetch, extraction and version
//! detection together, so a document's sub-requests never consume extra
//! permits), and one global pool capping OCR operations, which are CPU-bound
//! and must not be over-subscribed by network concurrency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{AppError, Result};

/// Issues bounded permits for fetch units and OCR operations.
///
/// Permits are owned and release on drop, so every exit path (success,
/// failure, cancellation) returns them to the pool.
pub struct Coordinator {
    fetch_pools: Mutex<HashMap<String, Arc<Semaphore>>>,
    ocr_pool: Arc<Semaphore>,
}

impl Coordinator {
    pub fn new(max_concurrent_ocr: usize) -> Self {
        Self {
            fetch_pools: Mutex::new(HashMap::new()),
            ocr_pool: Arc::new(Semaphore::new(max_concurrent_ocr.max(1))),
        }
    }

    /// Register a source's fetch pool. Re-registering a source is a no-op so
    /// a bound cannot change mid-run.
    pub fn register_source(&self, source: &str, concurrency: usize) {
        let mut pools = self
            .fetch_pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pools
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(concurrency.max(1))));
    }

    fn fetch_pool(&self, source: &str) -> Result<Arc<Semaphore>> {
        let pools = self
            .fetch_pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pools
            .get(source)
            .cloned()
            .ok_or_else(|| AppError::config(format!("no fetch pool registered for '{source}'")))
    }

    /// Acquire a fetch permit for a source, suspending until one is free.
    pub async fn fetch_permit(&self, source: &str) -> Result<OwnedSemaphorePermit> {
        let pool = self.fetch_pool(source)?;
        pool.acquire_owned()
            .await
            .map_err(|_| AppError::config(format!("fetch pool for '{source}' is closed")))
    }

    /// Acquire a global OCR permit, suspending until one is free.
    pub async fn ocr_permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.ocr_pool)
            .acquire_owned()
            .await
            .map_err(|_| AppError::config("OCR pool is closed"))
    }
}
