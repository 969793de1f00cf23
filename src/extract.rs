//! Eager (whole-document) extraction entry points.
//!
//! A run has two halves with very different costs:
//!
//! * **Scan** (blocking, local): open the PDF with pdfium, locate headers on
//!   page 1, rebuild rows on every page (OCR for image-only pages). Runs on
//!   one `spawn_blocking` thread.
//! * **Extract** (async, remote): send chunks of rows to the completion
//!   backend one at a time, then merge the records.
//!
//! [`extract`] does both and returns only when every chunk has been tried.
//! Use [`crate::stream::extract_stream`] to receive chunk results as they
//! arrive, or [`scan_document`](crate::pipeline::scan::scan_document) +
//! [`extract_from_scan`] to drive the halves separately.

use crate::config::ExtractionConfig;
use crate::error::GradesheetError;
use crate::output::{ChunkResult, ExtractionStats, GradesheetOutput, HeaderSource, OutputMeta};
use crate::pipeline::chunk::{plan_chunks, Chunk};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::llm::{extract_chunk, CompletionBackend, LlmBackend};
use crate::pipeline::load::{bind_pdfium, open_document};
use crate::pipeline::merge::merge_records;
use crate::pipeline::ocr;
use crate::pipeline::scan::{scan_document, ScannedDocument};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Extract student records from a gradesheet PDF file or URL.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(GradesheetOutput)` even when some pages or chunks failed; check
/// `output.page_errors` and `output.chunk_errors`.
///
/// # Errors
/// Returns `Err(GradesheetError)` only for fatal errors:
/// - File not found / permission denied / download failure
/// - Not a valid PDF, wrong password, no pages
/// - No completion backend could be configured
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<GradesheetOutput, GradesheetError> {
    let start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    extract_resolved(resolved, config, start).await
}

/// Extract from PDF bytes already in memory.
///
/// The bytes go to a managed temp file that is removed before this returns.
///
/// # Example
/// ```rust,no_run
/// use gradesheet_extract::{extract_from_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("grade7-sampaguita.pdf")?;
/// let output = extract_from_bytes(&bytes, &ExtractionConfig::default()).await?;
/// println!("{} students", output.records.len());
/// # Ok(())
/// # }
/// ```
pub async fn extract_from_bytes(
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<GradesheetOutput, GradesheetError> {
    let start = Instant::now();
    let resolved = input::resolve_bytes(bytes)?;
    extract_resolved(resolved, config, start).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<GradesheetOutput, GradesheetError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| GradesheetError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Extract and write the output as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, GradesheetError> {
    let output = extract(input_str, config).await?;
    write_json(&output, output_path.as_ref()).await?;
    Ok(output.stats)
}

/// Scan a document without calling the backend: page count, per-page text
/// item counts, detected headers and the rows that would be sent.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ScannedDocument, GradesheetError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    scan_path(resolved.path(), config).await
}

/// Run the extract half over an already scanned document.
///
/// Never fails: chunk failures are recorded in `chunk_errors`.
pub async fn extract_from_scan(
    scan: ScannedDocument,
    backend: &dyn CompletionBackend,
    config: &ExtractionConfig,
) -> GradesheetOutput {
    let meta = output_meta(&scan, config);
    if let Some(ref cb) = config.progress_callback {
        cb.on_scan_complete(scan.page_count, scan.lines.len());
    }

    let plan = plan_chunks(&scan.lines, config.chunk_size, config.min_chunk_chars);
    if !plan.skipped.is_empty() {
        debug!("Skipping {} short chunks: {:?}", plan.skipped.len(), plan.skipped);
    }
    info!(
        "Sending {} chunks of up to {} rows",
        plan.chunks.len(),
        config.chunk_size
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(plan.chunks.len());
    }

    let backend_start = Instant::now();
    let total = plan.total();
    let mut results: Vec<ChunkResult> = Vec::with_capacity(plan.chunks.len());
    for (position, chunk) in plan.chunks.iter().enumerate() {
        results.push(process_chunk(backend, chunk, position, total, &meta.headers, config).await);
    }
    let backend_duration_ms = backend_start.elapsed().as_millis() as u64;

    let raw_records: usize = results.iter().map(|r| r.records.len()).sum();
    let mut chunk_errors = Vec::new();
    let mut batches = Vec::with_capacity(results.len());
    for result in results {
        if let Some(error) = result.error {
            chunk_errors.push(error);
        }
        batches.push(result.records);
    }
    let records = merge_records(batches, config.merge_policy);

    let sent = plan.chunks.len();
    let succeeded = sent - chunk_errors.len();
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(sent, succeeded, records.len());
    }
    info!(
        "Extraction complete: {}/{} chunks ok, {} records ({} before merge)",
        succeeded,
        sent,
        records.len(),
        raw_records
    );

    let stats = ExtractionStats {
        total_pages: scan.page_count,
        ocr_pages: scan.ocr_pages(),
        total_lines: scan.lines.len(),
        total_chunks: total,
        sent_chunks: sent,
        skipped_chunks: plan.skipped.len(),
        failed_chunks: chunk_errors.len(),
        raw_records,
        merged_records: records.len(),
        scan_duration_ms: scan.duration_ms,
        backend_duration_ms,
        total_duration_ms: scan.duration_ms + backend_duration_ms,
    };

    GradesheetOutput {
        meta,
        records,
        stats,
        chunk_errors,
        page_errors: scan.page_errors,
    }
}

/// Resolve the completion backend, from most-specific to least-specific.
///
/// 1. **Pre-built backend** (`config.backend`): used as-is. This is how
///    tests and non-LLM backends plug in.
/// 2. **Pre-built provider** (`config.provider`): wrapped in [`LlmBackend`].
/// 3. **Named provider + model** (`config.provider_name`): created via
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **OpenAI key** present: OpenAI with the configured or default model.
/// 6. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_backend(
    config: &ExtractionConfig,
) -> Result<Arc<dyn CompletionBackend>, GradesheetError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmBackend::new(provider, config)))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn extract_resolved(
    resolved: ResolvedInput,
    config: &ExtractionConfig,
    start: Instant,
) -> Result<GradesheetOutput, GradesheetError> {
    // Fail on a missing API key before spending time on the scan.
    let backend = resolve_backend(config)?;

    let scan = scan_path(resolved.path(), config).await?;
    drop(resolved);

    let mut output = extract_from_scan(scan, backend.as_ref(), config).await;
    output.stats.total_duration_ms = start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Scan a local PDF on a blocking thread.
pub(crate) async fn scan_path(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<ScannedDocument, GradesheetError> {
    let pdf_path = pdf_path.to_path_buf();
    let config = config.clone();

    tokio::task::spawn_blocking(move || {
        let engine = ocr::resolve_engine(&config)?;
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, &pdf_path, config.password.as_deref())?;
        Ok(scan_document(&document, engine.as_ref(), &config))
    })
    .await
    .map_err(|e| GradesheetError::Internal(format!("Scan task panicked: {}", e)))?
}

/// Headers (detected or default) and grade level for the output.
pub(crate) fn output_meta(scan: &ScannedDocument, config: &ExtractionConfig) -> OutputMeta {
    let (headers, header_source) = match scan.headers {
        Some(ref detected) => (detected.clone(), HeaderSource::Detected),
        None => {
            info!(
                "Using {} default subject headers",
                config.default_headers.len()
            );
            (config.default_headers.clone(), HeaderSource::Default)
        }
    };

    let grade_level = config
        .grade_level
        .clone()
        .or_else(|| scan.grade_level.clone())
        .unwrap_or_default();

    OutputMeta {
        headers,
        grade_level,
        header_source,
        page_count: scan.page_count,
    }
}

/// Send one chunk, pausing first unless it is the first one sent, and
/// report progress.
pub(crate) async fn process_chunk(
    backend: &dyn CompletionBackend,
    chunk: &Chunk,
    position: usize,
    total: usize,
    headers: &[String],
    config: &ExtractionConfig,
) -> ChunkResult {
    if position > 0 && config.chunk_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.chunk_delay_ms)).await;
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_chunk_start(chunk.index, total);
    }

    let result = extract_chunk(backend, chunk, headers, config).await;

    match result.error {
        None => {
            if let Some(ref cb) = config.progress_callback {
                cb.on_chunk_complete(chunk.index, total, result.records.len());
            }
        }
        Some(ref e) => {
            warn!("{}", e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_chunk_error(chunk.index, total, &e.to_string());
            }
        }
    }
    result
}

/// Serialise `output` to `path` through a sibling temp file.
async fn write_json(output: &GradesheetOutput, path: &Path) -> Result<(), GradesheetError> {
    let write_failed = |e: std::io::Error| GradesheetError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
    }

    let json = serde_json::to_vec_pretty(output)
        .map_err(|e| GradesheetError::Internal(format!("serialise output: {}", e)))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, GradesheetError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        GradesheetError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, GradesheetError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| GradesheetError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, ChunkError};
    use crate::output::Gender;
    use crate::pipeline::lines::TaggedLine;
    use crate::pipeline::llm::tests::ScriptedBackend;
    use crate::progress::ExtractionProgressCallback;
    use std::sync::Mutex;

    fn line(text: &str, gender: Gender) -> TaggedLine {
        TaggedLine {
            text: text.into(),
            gender,
            page: 1,
        }
    }

    fn scan(lines: Vec<TaggedLine>, headers: Option<Vec<String>>) -> ScannedDocument {
        ScannedDocument {
            page_count: 1,
            headers,
            lines,
            ..Default::default()
        }
    }

    fn subjects() -> Option<Vec<String>> {
        Some(vec!["subject1".into(), "subject2".into(), "subject3".into()])
    }

    fn config(chunk_size: usize) -> ExtractionConfig {
        ExtractionConfig::builder().chunk_size(chunk_size).build().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_across_chunks_keeps_first() {
        let backend = ScriptedBackend::new(vec![
            Some(Ok(r#"[{"name":"DELACRUZ, JUAN","gender":"MALE","grades":{"subject1":"90","subject2":"85"}}]"#.into())),
            Some(Ok(r#"[{"name":"DELACRUZ, JUAN","gender":"MALE","grades":{"subject1":"88","subject2":"80"}}]"#.into())),
        ]);
        let doc = scan(
            vec![
                line("1. DELACRUZ, JUAN | 90 | 85", Gender::Male),
                line("2. DELACRUZ, JUAN | 88 | 80", Gender::Male),
            ],
            subjects(),
        );

        let out = extract_from_scan(doc, &backend, &config(1)).await;

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].grades["subject1"], "90");
        assert_eq!(out.records[0].grades["subject2"], "85");
        assert_eq!(out.stats.raw_records, 2);
        assert_eq!(out.stats.merged_records, 1);
        assert_eq!(out.meta.header_source, HeaderSource::Detected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_chunk_does_not_sink_the_run() {
        let backend = ScriptedBackend::new(vec![
            Some(Ok(r#"[{"name":"SANTOS, PEDRO","grades":{"subject1":"91"}}]"#.into())),
            Some(Err(BackendError::Transport("502".into()))),
            Some(Ok("no json here".into())),
            Some(Err(BackendError::Transport("502".into()))),
        ]);
        let doc = scan(
            vec![
                line("1. SANTOS, PEDRO | 91", Gender::Male),
                line("2. REYES, ANA | 89", Gender::Female),
            ],
            subjects(),
        );

        let out = extract_from_scan(doc, &backend, &config(1)).await;

        assert_eq!(out.records.len(), 1);
        assert_eq!(out.stats.failed_chunks, 1);
        assert!(matches!(
            out.chunk_errors.as_slice(),
            [ChunkError::RetriesExhausted { chunk: 1, attempts: 3, .. }]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn short_chunk_is_never_sent() {
        let backend = ScriptedBackend::new(vec![Some(Ok("[]".into()))]);
        let doc = scan(
            vec![
                line("1. SANTOS, PEDRO | 91 | 90", Gender::Male),
                line("abcde", Gender::Male),
            ],
            subjects(),
        );
        // "[MALE] abcde" is 12 chars, below the 20-char floor.
        let out = extract_from_scan(doc, &backend, &config(1)).await;
        assert_eq!(backend.call_count(), 1);
        assert_eq!(out.stats.total_chunks, 2);
        assert_eq!(out.stats.skipped_chunks, 1);
        assert_eq!(out.stats.sent_chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_headers_fall_back_to_defaults() {
        let backend = ScriptedBackend::new(vec![]);
        let config = ExtractionConfig::builder().grade_level("GRADE 9").build().unwrap();
        let mut doc = scan(vec![], None);
        doc.grade_level = Some("GRADE 7".into());

        let out = extract_from_scan(doc, &backend, &config).await;

        assert_eq!(out.meta.headers, config.default_headers);
        assert_eq!(out.meta.header_source, HeaderSource::Default);
        assert_eq!(out.meta.grade_level, "GRADE 9");
        assert!(out.records.is_empty());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_carries_headers_and_gender_tags() {
        let backend = ScriptedBackend::new(vec![Some(Ok("[]".into()))]);
        let doc = scan(
            vec![line("3. REYES, ANA | 91 | 89", Gender::Female)],
            subjects(),
        );
        extract_from_scan(doc, &backend, &ExtractionConfig::default()).await;

        let calls = backend.calls.lock().unwrap();
        assert!(calls[0].prompt.contains(r#"["subject1","subject2","subject3"]"#));
        assert!(calls[0].prompt.contains("[FEMALE] 3. REYES, ANA | 91 | 89"));
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_are_spaced_by_the_configured_delay() {
        let backend = ScriptedBackend::new(vec![]);
        let lines = (0..3)
            .map(|i| line(&format!("{i}. STUDENT NUMBER {i} | 90"), Gender::Male))
            .collect();
        let start = tokio::time::Instant::now();
        extract_from_scan(scan(lines, subjects()), &backend, &config(1)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl ExtractionProgressCallback for EventLog {
        fn on_scan_complete(&self, pages: usize, lines: usize) {
            self.0.lock().unwrap().push(format!("scan {pages} {lines}"));
        }
        fn on_extraction_start(&self, chunks: usize) {
            self.0.lock().unwrap().push(format!("start {chunks}"));
        }
        fn on_chunk_start(&self, index: usize, total: usize) {
            self.0.lock().unwrap().push(format!("chunk {index}/{total}"));
        }
        fn on_chunk_complete(&self, index: usize, _total: usize, records: usize) {
            self.0.lock().unwrap().push(format!("ok {index} {records}"));
        }
        fn on_chunk_error(&self, index: usize, _total: usize, _error: &str) {
            self.0.lock().unwrap().push(format!("err {index}"));
        }
        fn on_extraction_complete(&self, chunks: usize, succeeded: usize, records: usize) {
            self.0.lock().unwrap().push(format!("done {chunks} {succeeded} {records}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_events_arrive_in_order() {
        let log = Arc::new(EventLog::default());
        let config = ExtractionConfig::builder()
            .chunk_size(1)
            .max_attempts(1)
            .progress_callback(log.clone())
            .build()
            .unwrap();
        let backend = ScriptedBackend::new(vec![
            Some(Ok(r#"[{"name":"SANTOS, PEDRO"}]"#.into())),
            Some(Err(BackendError::Transport("down".into()))),
        ]);
        let doc = scan(
            vec![
                line("1. SANTOS, PEDRO | 91", Gender::Male),
                line("2. REYES, ANA | 89 | 90", Gender::Female),
            ],
            subjects(),
        );

        extract_from_scan(doc, &backend, &config).await;

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "scan 1 2",
                "start 2",
                "chunk 0/2",
                "ok 0 1",
                "chunk 1/2",
                "err 1",
                "done 2 1 1",
            ]
        );
    }

    #[test]
    fn explicit_backend_wins_resolution() {
        let backend: Arc<dyn CompletionBackend> = Arc::new(ScriptedBackend::new(vec![]));
        let config = ExtractionConfig::builder()
            .backend(Arc::clone(&backend))
            .build()
            .unwrap();
        let resolved = resolve_backend(&config).unwrap();
        assert!(Arc::ptr_eq(&resolved, &backend));
    }

    #[tokio::test]
    async fn write_json_is_atomic_and_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("grades.json");
        let output = GradesheetOutput {
            meta: OutputMeta {
                headers: vec!["MATH".into()],
                grade_level: "GRADE 7".into(),
                header_source: HeaderSource::Detected,
                page_count: 1,
            },
            records: vec![],
            stats: ExtractionStats::default(),
            chunk_errors: vec![],
            page_errors: vec![],
        };

        write_json(&output, &path).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"gradeLevel\": \"GRADE 7\""));
        assert!(!path.with_extension("json.tmp").exists());
    }
}
