//! Error types for the gradesheet-extract library.
//!
//! Failures are split by blast radius:
//!
//! * [`GradesheetError`] (**fatal**): the run cannot proceed at all (missing
//!   file, corrupt PDF, no backend configured). Returned as
//!   `Err(GradesheetError)` from the top-level `extract*` functions.
//!
//! * [`PageError`] (**non-fatal**): one page could not be read (OCR failed
//!   or timed out, render glitch). The page contributes no rows and the scan
//!   continues.
//!
//! * [`ChunkError`] (**non-fatal**): one chunk exhausted its attempts
//!   against the extraction backend. The chunk contributes no records and
//!   every other chunk is still merged.
//!
//! * [`BackendError`] / [`OcrError`]: a single failed attempt. These never
//!   leave the module that retries them; they are folded into the non-fatal
//!   kinds above.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the gradesheet-extract library.
#[derive(Debug, Error)]
pub enum GradesheetError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Gradesheet file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The document opened but contains no pages.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Backend errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The OCR engine could not be loaded from its model files.
    #[error("OCR engine could not be loaded: {0}")]
    OcrEngineLoad(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page of the document.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The embedded text layer could not be read.
    #[error("Page {page}: text layer unreadable: {detail}")]
    TextLayerFailed { page: usize, detail: String },

    /// Rasterising an image-only page failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The OCR engine returned an error.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The OCR engine did not answer within the configured timeout.
    #[error("Page {page}: OCR timed out after {secs}s")]
    OcrTimedOut { page: usize, secs: u64 },

    /// An earlier page's OCR call timed out and still holds the engine.
    #[error("Page {page}: OCR skipped, engine still busy with page {stalled_page}")]
    OcrSkipped { page: usize, stalled_page: usize },

    /// The page has no text layer and no OCR engine is configured.
    #[error("Page {page}: image-only page skipped, no OCR engine configured")]
    OcrUnavailable { page: usize },
}

/// A non-fatal error for one chunk sent to the extraction backend.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// Every attempt failed; at least one failure was not a timeout.
    #[error("Chunk {chunk}: extraction failed after {attempts} attempts: {detail}")]
    RetriesExhausted {
        chunk: usize,
        attempts: u32,
        detail: String,
    },

    /// Every attempt ran into the per-call timeout.
    #[error("Chunk {chunk}: backend timed out on all {attempts} attempts ({secs}s each)")]
    TimedOut { chunk: usize, attempts: u32, secs: u64 },
}

impl ChunkError {
    /// Index of the chunk this error belongs to.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::RetriesExhausted { chunk, .. } | ChunkError::TimedOut { chunk, .. } => {
                *chunk
            }
        }
    }
}

/// One failed attempt against the extraction backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// Network, HTTP, or provider-side failure.
    #[error("transport: {0}")]
    Transport(String),

    /// The call exceeded the per-call timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The response arrived but did not contain a parseable JSON array.
    #[error("malformed response: {0}")]
    Parse(String),
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout { .. })
    }
}

/// Failure reported by an [`crate::pipeline::ocr::OcrEngine`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OcrError {
    #[error("model load: {0}")]
    ModelLoad(String),

    #[error("recognition: {0}")]
    Recognition(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}
