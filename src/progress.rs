//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline scans the document and works through its chunks.
//!
//! Callers forward these wherever they like (a terminal progress bar, a
//! channel, a job table) without the library knowing how.
//!
//! # Example
//!
//! ```rust
//! use gradesheet_extract::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     records: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, index: usize, total: usize, records: usize) {
//!         self.records.fetch_add(records, Ordering::SeqCst);
//!         eprintln!("Chunk {}/{}: {} records", index + 1, total, records);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     records: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Chunks are processed one at a time, so chunk events
/// arrive in index order and never overlap.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the whole document has been scanned.
    ///
    /// # Arguments
    /// * `pages`: pages in the document
    /// * `lines`: tagged data rows that survived line extraction
    fn on_scan_complete(&self, pages: usize, lines: usize) {
        let _ = (pages, lines);
    }

    /// Called before the first chunk is sent.
    ///
    /// # Arguments
    /// * `chunks`: chunks that will be sent (skipped chunks excluded)
    fn on_extraction_start(&self, chunks: usize) {
        let _ = chunks;
    }

    /// Called just before a chunk's first attempt.
    ///
    /// # Arguments
    /// * `index`: 0-based chunk index among all planned chunks
    /// * `total`: chunks planned, skipped ones included
    fn on_chunk_start(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called when a chunk returned parseable records.
    fn on_chunk_complete(&self, index: usize, total: usize, records: usize) {
        let _ = (index, total, records);
    }

    /// Called when a chunk failed after all attempts.
    ///
    /// # Arguments
    /// * `error`: human-readable error description
    fn on_chunk_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once after every chunk has been attempted and merged.
    ///
    /// # Arguments
    /// * `chunks`: chunks sent
    /// * `succeeded`: chunks that produced a parseable answer
    /// * `records`: records after merging
    fn on_extraction_complete(&self, chunks: usize, succeeded: usize, records: usize) {
        let _ = (chunks, succeeded, records);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
