//! Configuration types for gradesheet extraction.
//!
//! Every tunable of the pipeline lives in [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Nothing is a module-level global: two
//! concurrent invocations with different configs never observe each other.

use crate::error::GradesheetError;
use crate::pipeline::llm::CompletionBackend;
use crate::pipeline::ocr::OcrEngine;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Subject list used when the page-1 layout does not yield at least three
/// headers.
pub const DEFAULT_HEADERS: &[&str] = &[
    "FILIPINO",
    "ENGLISH",
    "MATHEMATICS",
    "SCIENCE",
    "ARALING PANLIPUNAN",
    "EDUKASYON SA PAGPAPAKATAO",
    "TLE",
    "MAPEH",
];

/// Boilerplate rows dropped by the line extractor (case-insensitive substring).
pub const DEFAULT_EXCLUDED_ROW_TERMS: &[&str] = &[
    "ADVISER",
    "ADVISOR",
    "SIGNATURE",
    "PRINCIPAL",
    "SCHOOL HEAD",
    "PREPARED BY",
    "CHECKED BY",
    "APPROVED BY",
    "NOTED BY",
    "SUBMITTED BY",
    "CERTIFIED",
    "LEARNER'S NAME",
    "LEARNERS' NAMES",
    "NAME OF LEARNER",
    "DESCRIPTORS",
    "GRADING SCALE",
    "DID NOT MEET",
    "FAIRLY SATISFACTORY",
];

/// Words that never make a subject label (matched per word, case-insensitive).
pub const DEFAULT_EXCLUDED_HEADER_TERMS: &[&str] = &[
    "NAME", "NAMES", "LEARNER", "LEARNERS", "LRN", "SEX", "NO", "AVERAGE", "GENERAL", "FINAL",
    "GRADE", "GRADES", "REMARKS", "QUARTER", "RATING", "TOTAL", "ACTION", "TAKEN",
];

/// Configuration for one gradesheet extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use gradesheet_extract::{ExtractionConfig, MergePolicy};
///
/// let config = ExtractionConfig::builder()
///     .chunk_size(12)
///     .merge_policy(MergePolicy::UnionGrades)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    // ── Line extraction ──────────────────────────────────────────────────
    /// Pages with fewer embedded text items than this are treated as
    /// image-only and routed to OCR. Default: 5.
    pub min_text_items: usize,

    /// Height of one row band, in PDF points. Items whose y rounds to the
    /// same multiple share a row. Default: 4.0.
    pub row_bucket: f32,

    /// Rows shorter than this (in characters) are dropped. Default: 5.
    pub min_row_len: usize,

    /// A gender divider is at most this long; longer rows mentioning a sex
    /// are data rows. Default: 40.
    pub max_divider_len: usize,

    /// Boilerplate rows containing any of these terms are dropped.
    pub excluded_row_terms: Vec<String>,

    // ── OCR ──────────────────────────────────────────────────────────────
    /// Render scale applied to image-only pages before OCR. Default: 2.5.
    pub ocr_scale: f32,

    /// Language code handed to the OCR engine. Default: `"eng"`.
    pub ocr_language: String,

    /// Per-page OCR timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Pre-constructed OCR engine. Takes precedence over `ocr_model_dir`.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Directory containing PaddleOCR ONNX models for the built-in engine.
    pub ocr_model_dir: Option<PathBuf>,

    // ── Headers ──────────────────────────────────────────────────────────
    pub header: HeaderConfig,

    /// Used when header detection fails. Default: [`DEFAULT_HEADERS`].
    pub default_headers: Vec<String>,

    /// Overrides grade-level detection when set, e.g. `"GRADE 9"`.
    pub grade_level: Option<String>,

    // ── Chunking & backend ───────────────────────────────────────────────
    /// Lines per chunk sent to the backend. Default: 10.
    pub chunk_size: usize,

    /// Chunks whose joined text is shorter than this are skipped. Default: 20.
    pub min_chunk_chars: usize,

    /// Pause between consecutive chunk requests. Default: 300 ms.
    pub chunk_delay_ms: u64,

    /// Attempts and delays for each chunk. Default: 3 attempts, fixed 1.5 s.
    pub retry: RetryPolicy,

    /// Per-call backend timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// LLM model identifier. If None, uses `gpt-4.1-nano`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed completion backend. Takes precedence over `provider`.
    pub backend: Option<Arc<dyn CompletionBackend>>,

    /// Sampling temperature. Default: 0.0, structuring is not creative work.
    pub temperature: f32,

    /// Maximum tokens per backend response. Default: 4096.
    pub max_tokens: usize,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    // ── Merge ────────────────────────────────────────────────────────────
    pub merge_policy: MergePolicy,

    /// Fill a missing `average` with the mean of the numeric grades. Default: true.
    pub fill_missing_average: bool,

    // ── Input ────────────────────────────────────────────────────────────
    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_items: 5,
            row_bucket: 4.0,
            min_row_len: 5,
            max_divider_len: 40,
            excluded_row_terms: to_strings(DEFAULT_EXCLUDED_ROW_TERMS),
            ocr_scale: 2.5,
            ocr_language: "eng".to_string(),
            ocr_timeout_secs: 120,
            ocr_engine: None,
            ocr_model_dir: None,
            header: HeaderConfig::default(),
            default_headers: to_strings(DEFAULT_HEADERS),
            grade_level: None,
            chunk_size: 10,
            min_chunk_chars: 20,
            chunk_delay_ms: 300,
            retry: RetryPolicy::default(),
            api_timeout_secs: 60,
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            temperature: 0.0,
            max_tokens: 4096,
            system_prompt: None,
            merge_policy: MergePolicy::default(),
            fill_missing_average: true,
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("min_text_items", &self.min_text_items)
            .field("row_bucket", &self.row_bucket)
            .field("min_row_len", &self.min_row_len)
            .field("max_divider_len", &self.max_divider_len)
            .field("excluded_row_terms", &self.excluded_row_terms)
            .field("ocr_scale", &self.ocr_scale)
            .field("ocr_language", &self.ocr_language)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|_| "<dyn OcrEngine>"))
            .field("ocr_model_dir", &self.ocr_model_dir)
            .field("header", &self.header)
            .field("default_headers", &self.default_headers)
            .field("grade_level", &self.grade_level)
            .field("chunk_size", &self.chunk_size)
            .field("min_chunk_chars", &self.min_chunk_chars)
            .field("chunk_delay_ms", &self.chunk_delay_ms)
            .field("retry", &self.retry)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn CompletionBackend>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("merge_policy", &self.merge_policy)
            .field("fill_missing_average", &self.fill_missing_average)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn min_text_items(mut self, n: usize) -> Self {
        self.config.min_text_items = n;
        self
    }

    pub fn row_bucket(mut self, points: f32) -> Self {
        self.config.row_bucket = points;
        self
    }

    pub fn min_row_len(mut self, n: usize) -> Self {
        self.config.min_row_len = n;
        self
    }

    pub fn max_divider_len(mut self, n: usize) -> Self {
        self.config.max_divider_len = n;
        self
    }

    pub fn excluded_row_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.excluded_row_terms = terms.into_iter().map(Into::into).collect();
        self
    }

    pub fn ocr_scale(mut self, scale: f32) -> Self {
        self.config.ocr_scale = scale;
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn ocr_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.ocr_model_dir = Some(dir.into());
        self
    }

    pub fn header(mut self, header: HeaderConfig) -> Self {
        self.config.header = header;
        self
    }

    pub fn default_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn grade_level(mut self, level: impl Into<String>) -> Self {
        self.config.grade_level = Some(level.into());
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn min_chunk_chars(mut self, n: usize) -> Self {
        self.config.min_chunk_chars = n;
        self
    }

    pub fn chunk_delay_ms(mut self, ms: u64) -> Self {
        self.config.chunk_delay_ms = ms;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    pub fn fill_missing_average(mut self, v: bool) -> Self {
        self.config.fill_missing_average = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, GradesheetError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(GradesheetError::InvalidConfig(
                "chunk_size must be ≥ 1".into(),
            ));
        }
        if c.retry.max_attempts == 0 {
            return Err(GradesheetError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.ocr_timeout_secs == 0 {
            return Err(GradesheetError::InvalidConfig(
                "api_timeout_secs and ocr_timeout_secs must be ≥ 1".into(),
            ));
        }
        if !(0.5..=8.0).contains(&c.ocr_scale) {
            return Err(GradesheetError::InvalidConfig(format!(
                "ocr_scale must be 0.5–8.0, got {}",
                c.ocr_scale
            )));
        }
        if c.row_bucket <= 0.0 {
            return Err(GradesheetError::InvalidConfig(format!(
                "row_bucket must be positive, got {}",
                c.row_bucket
            )));
        }
        if c.default_headers.len() < c.header.min_headers {
            return Err(GradesheetError::InvalidConfig(format!(
                "default_headers needs at least {} entries, got {}",
                c.header.min_headers,
                c.default_headers.len()
            )));
        }
        Ok(self.config)
    }
}

// ── Header detection ─────────────────────────────────────────────────────

/// Thresholds for inferring subject columns from the page-1 layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Page 1 needs at least this many text items. Default: 10.
    pub min_page_items: usize,
    /// Inclusive numeric range of a plausible grade. Default: 60–100.
    pub grade_min: f64,
    pub grade_max: f64,
    /// Longest string still read as a grade value. Default: 6.
    pub max_grade_len: usize,
    /// Grade-value candidates required. Default: 10.
    pub min_candidates: usize,
    /// Width of an x bucket. Default: 10.
    pub column_bucket: f32,
    /// A bucket must hold more than this many grades to be a column. Default: 5.
    pub min_column_hits: usize,
    /// How far above the topmost grade row to look for labels. Default: 200.
    pub search_height: f32,
    /// Horizontal tolerance between a label and its column. Default: 30.
    pub x_tolerance: f32,
    /// Fewer unique labels than this counts as failure. Default: 3.
    pub min_headers: usize,
    /// Label candidates containing any of these words are skipped.
    pub excluded_terms: Vec<String>,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            min_page_items: 10,
            grade_min: 60.0,
            grade_max: 100.0,
            max_grade_len: 6,
            min_candidates: 10,
            column_bucket: 10.0,
            min_column_hits: 5,
            search_height: 200.0,
            x_tolerance: 30.0,
            min_headers: 3,
            excluded_terms: to_strings(DEFAULT_EXCLUDED_HEADER_TERMS),
        }
    }
}

// ── Retry ────────────────────────────────────────────────────────────────

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same pause before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(retry - 1)`: 500 ms → 1 s → 2 s with a 500 ms base.
    Exponential { base_ms: u64 },
}

/// Bounded retry policy for backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Default: 3.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed { delay_ms: 1500 },
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (1 for the second attempt).
    pub fn delay_before(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                let factor = 2u64.saturating_pow(retry - 1);
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }
}

// ── Merge ────────────────────────────────────────────────────────────────

/// How records sharing a dedup key are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergePolicy {
    /// Keep the first record seen for a key, discard the rest. (default)
    #[default]
    FirstWins,
    /// Keep the first record, but fill grades (and a missing average) that
    /// only later duplicates carry. Useful when one student's row was split
    /// across two chunks.
    UnionGrades,
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.chunk_size, 10);
        assert_eq!(c.min_text_items, 5);
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.chunk_delay_ms, 300);
        assert_eq!(c.merge_policy, MergePolicy::FirstWins);
        assert!(c.default_headers.len() >= 3);
    }

    #[test]
    fn builder_sets_divider_len_and_debug_lists_row_filters() {
        let c = ExtractionConfig::builder()
            .max_divider_len(12)
            .password("hunter2")
            .build()
            .unwrap();
        assert_eq!(c.max_divider_len, 12);

        let dbg = format!("{:?}", c);
        assert!(dbg.contains("max_divider_len: 12"));
        assert!(dbg.contains("excluded_row_terms"));
        assert!(dbg.contains("chunk_delay_ms: 300"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_before(0), Duration::ZERO);
        assert_eq!(p.delay_before(1), Duration::from_millis(1500));
        assert_eq!(p.delay_before(2), Duration::from_millis(1500));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 4,
            backoff: Backoff::Exponential { base_ms: 500 },
        };
        assert_eq!(p.delay_before(1), Duration::from_millis(500));
        assert_eq!(p.delay_before(2), Duration::from_millis(1000));
        assert_eq!(p.delay_before(3), Duration::from_millis(2000));
    }

    #[test]
    fn build_rejects_zero_chunk_size() {
        let err = ExtractionConfig::builder().chunk_size(0).build().unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn build_rejects_zero_attempts() {
        assert!(ExtractionConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn build_rejects_short_default_headers() {
        let err = ExtractionConfig::builder()
            .default_headers(["MATH", "SCIENCE"])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("default_headers"));
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ExtractionConfig::builder().temperature(5.0).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }
}
