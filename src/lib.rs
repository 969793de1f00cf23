//! # gradesheet-extract
//!
//! Extract per-student grade records from class gradesheet PDFs.
//!
//! ## Why this crate?
//!
//! School gradesheets are tables in spirit only: exported from spreadsheets,
//! scanned from paper, or assembled in word processors, they rarely carry a
//! real table structure. This crate recovers the rows from the PDF's text
//! positions (or OCR for scanned pages), works out the subject columns from
//! where the grades sit on page 1, and lets an LLM turn each batch of rows
//! into structured records under a strict JSON contract.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file, URL or in-memory bytes
//!  ├─ 2. Scan     pdfium text layer per page (spawn_blocking)
//!  │     ├─ headers  subject labels from page-1 grade columns
//!  │     ├─ lines    rows by y-band, gender dividers, boilerplate filter
//!  │     └─ ocr      image-only pages rendered and recognised
//!  ├─ 3. Chunk    10 tagged rows per request
//!  ├─ 4. LLM      sequential calls, per-call timeout, 3 attempts
//!  └─ 5. Merge    dedup by letters-only uppercased name
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gradesheet_extract::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = ExtractionConfig::default();
//!     let output = extract("grade7-sampaguita.pdf", &config).await?;
//!     println!("{:?}", output.meta.headers);
//!     for student in &output.records {
//!         println!("{} ({}) {:?}", student.name, student.gender, student.average);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `gradesheet` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `ocr`   | on      | Built-in [`PureOcrEngine`] for scanned pages (pure-onnx-ocr) |
//!
//! Without an OCR engine, image-only pages are skipped and reported in
//! `output.page_errors`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod roster;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Backoff, ExtractionConfig, ExtractionConfigBuilder, HeaderConfig, MergePolicy, RetryPolicy,
};
pub use error::{BackendError, ChunkError, GradesheetError, OcrError, PageError};
pub use extract::{
    extract, extract_from_bytes, extract_from_scan, extract_sync, extract_to_file, inspect,
    resolve_backend,
};
pub use output::{
    ChunkResult, ExtractedStudentRecord, ExtractionStats, Gender, GradesheetOutput, HeaderSource,
    OutputMeta,
};
pub use pipeline::llm::{CompletionBackend, CompletionRequest, CompletionResponse, LlmBackend};
pub use pipeline::load::{PageSource, TextItem};
pub use pipeline::merge::merge_records;
#[cfg(feature = "ocr")]
pub use pipeline::ocr::PureOcrEngine;
pub use pipeline::ocr::OcrEngine;
pub use pipeline::scan::{scan_document, ScannedDocument};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use roster::{find_match, RosterEntry};
pub use stream::{extract_stream, extract_stream_from_bytes, ChunkStream, ExtractionStream};
