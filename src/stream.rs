//! Streaming extraction API: emit chunk results as they complete.
//!
//! A 40-page gradesheet is a few hundred chunks and several minutes of
//! backend time. [`extract_stream`] scans the document up front (so the
//! headers are known), then yields one [`ChunkResult`] per sent chunk, in
//! chunk order, as each finishes. Callers can show partial records, persist
//! them incrementally, or stop early by dropping the stream.
//!
//! Records are not merged across chunks here; feed the collected
//! `records` to [`crate::merge_records`] to get the same result as
//! [`crate::extract::extract`].

use crate::config::ExtractionConfig;
use crate::error::{GradesheetError, PageError};
use crate::extract::{output_meta, process_chunk, resolve_backend, scan_path};
use crate::output::{ChunkResult, OutputMeta};
use crate::pipeline::chunk::plan_chunks;
use crate::pipeline::input::{self, ResolvedInput};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of chunk results.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChunkResult> + Send>>;

/// What is known before the first chunk is sent, plus the stream itself.
pub struct ExtractionStream {
    pub meta: OutputMeta,
    /// Rows that will be sent, across all chunks.
    pub total_lines: usize,
    /// Indices of chunks too short to send.
    pub skipped_chunks: Vec<usize>,
    pub page_errors: Vec<PageError>,
    pub chunks: ChunkStream,
}

/// Extract from a PDF file or URL, streaming chunk results as they complete.
///
/// # Returns
/// - `Ok(ExtractionStream)` once the scan is done
/// - `Err(GradesheetError)` for fatal errors (file not found, not a PDF,
///   no backend configured)
pub async fn extract_stream(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionStream, GradesheetError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming extraction: {}", input_str);
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    stream_resolved(resolved, config).await
}

/// Streaming equivalent of [`crate::extract::extract_from_bytes`].
///
/// # Example
/// ```rust,no_run
/// use gradesheet_extract::{extract_stream_from_bytes, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("grade7-sampaguita.pdf")?;
/// let mut run = extract_stream_from_bytes(&bytes, &ExtractionConfig::default()).await?;
/// println!("headers: {:?}", run.meta.headers);
/// while let Some(chunk) = run.chunks.next().await {
///     match chunk.error {
///         None => println!("chunk {}: {} records", chunk.index, chunk.records.len()),
///         Some(e) => eprintln!("{e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ExtractionStream, GradesheetError> {
    let resolved = input::resolve_bytes(bytes)?;
    stream_resolved(resolved, config).await
}

async fn stream_resolved(
    resolved: ResolvedInput,
    config: &ExtractionConfig,
) -> Result<ExtractionStream, GradesheetError> {
    let backend = resolve_backend(config)?;

    // The scan reads every page before returning, so the temp file can go.
    let scan = scan_path(resolved.path(), config).await?;
    drop(resolved);

    let meta = output_meta(&scan, config);
    if let Some(ref cb) = config.progress_callback {
        cb.on_scan_complete(scan.page_count, scan.lines.len());
    }

    let plan = plan_chunks(&scan.lines, config.chunk_size, config.min_chunk_chars);
    let total = plan.total();
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(plan.chunks.len());
    }

    let headers = Arc::new(meta.headers.clone());
    let config = Arc::new(config.clone());

    let chunks = stream::iter(plan.chunks.into_iter().enumerate()).then(move |(position, chunk)| {
        let backend = Arc::clone(&backend);
        let headers = Arc::clone(&headers);
        let config = Arc::clone(&config);
        async move {
            process_chunk(backend.as_ref(), &chunk, position, total, &headers, &config).await
        }
    });

    Ok(ExtractionStream {
        meta,
        total_lines: scan.lines.len(),
        skipped_chunks: plan.skipped,
        page_errors: scan.page_errors,
        chunks: Box::pin(chunks),
    })
}
