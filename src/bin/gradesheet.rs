//! CLI binary for gradesheet-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the JSON result.

use anyhow::{Context, Result};
use clap::Parser;
use gradesheet_extract::{
    extract, extract_to_file, inspect, Backoff, ExtractionConfig, ExtractionProgressCallback,
    MergePolicy, ProgressCallback, RetryPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the document is scanned, then a bar over chunks.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Reading pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_scan_complete(&self, pages: usize, lines: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Scanned {pages} pages, {lines} student rows"))
        ));
    }

    fn on_extraction_start(&self, chunks: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(chunks as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn on_chunk_start(&self, index: usize, _total: usize) {
        self.bar.set_message(format!("chunk {}", index + 1));
    }

    fn on_chunk_complete(&self, index: usize, total: usize, records: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{records:>2} records")),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, chunks: usize, succeeded: usize, records: usize) {
        self.bar.finish_and_clear();
        let failed = chunks.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!(
                "{} {} students from {} chunks",
                green("✔"),
                bold(&records.to_string()),
                chunks
            );
        } else {
            eprintln!(
                "{} {} students, {}/{} chunks failed",
                if failed == chunks { red("✘") } else { cyan("⚠") },
                bold(&records.to_string()),
                red(&failed.to_string()),
                chunks,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract to stdout
  gradesheet grade7-sampaguita.pdf

  # Write JSON to a file
  gradesheet grade7-sampaguita.pdf -o grades.json

  # Scanned gradesheet: point at PaddleOCR ONNX models
  gradesheet --ocr-models ./models scanned.pdf

  # Combine grades when a student's row is split across chunks
  gradesheet --merge-policy union grade10.pdf

  # See what would be sent, without calling the LLM
  gradesheet --inspect-only grade7-sampaguita.pdf

OCR MODELS (--ocr-models DIR):
  det.onnx            text detection model
  latin_rec.onnx      recognition model (English / Filipino)
  latin_dict.txt      recognition dictionary

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Extract per-student grade records from gradesheet PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "gradesheet",
    version,
    about = "Extract per-student grade records from gradesheet PDFs",
    long_about = "Extract per-student grade records (name, gender, grades per subject, average) \
from class gradesheet PDFs. Rows are rebuilt from the PDF text layer or OCR, subject headers are \
inferred from the page-1 layout, and an LLM structures each batch of rows.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "GRADESHEET_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (default: gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Grade level to report, e.g. "GRADE 7". Detected from page 1 if unset.
    #[arg(long, env = "GRADESHEET_GRADE_LEVEL")]
    grade_level: Option<String>,

    /// Rows per LLM request.
    #[arg(long, env = "GRADESHEET_CHUNK_SIZE", default_value_t = 10)]
    chunk_size: usize,

    /// Attempts per chunk before giving up on it.
    #[arg(long, env = "GRADESHEET_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Milliseconds between attempts.
    #[arg(long, env = "GRADESHEET_RETRY_DELAY", default_value_t = 1500)]
    retry_delay: u64,

    /// Double the retry delay after every failed attempt.
    #[arg(long)]
    exponential_backoff: bool,

    /// How duplicate students are combined.
    #[arg(long, env = "GRADESHEET_MERGE_POLICY", value_enum, default_value = "first-wins")]
    merge_policy: MergePolicyArg,

    /// Directory with PaddleOCR ONNX models for scanned pages.
    #[arg(long, env = "GRADESHEET_OCR_MODELS")]
    ocr_models: Option<PathBuf>,

    /// OCR language code.
    #[arg(long, env = "GRADESHEET_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "GRADESHEET_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "GRADESHEET_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "GRADESHEET_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "GRADESHEET_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Scan the document and print what would be sent; no LLM calls.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "GRADESHEET_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "GRADESHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "GRADESHEET_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MergePolicyArg {
    FirstWins,
    Union,
}

impl From<MergePolicyArg> for MergePolicy {
    fn from(v: MergePolicyArg) -> Self {
        match v {
            MergePolicyArg::FirstWins => MergePolicy::FirstWins,
            MergePolicyArg::Union => MergePolicy::UnionGrades,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let scan = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect gradesheet")?;

        println!("File:         {}", cli.input);
        println!("Pages:        {}", scan.page_count);
        match scan.headers {
            Some(ref h) => println!("Headers:      {} (detected)", h.join(", ")),
            None => println!(
                "Headers:      {} (default)",
                config.default_headers.join(", ")
            ),
        }
        if let Some(ref level) = scan.grade_level {
            println!("Grade level:  {}", level);
        }
        println!("Rows:         {}", scan.lines.len());
        for page in &scan.pages {
            println!(
                "  page {:>3}: {:>4} text items  {:>3} rows{}",
                page.page,
                page.text_items,
                page.rows,
                if page.ocr { "  (OCR)" } else { "" }
            );
        }
        for e in &scan.page_errors {
            println!("  {}", red(&e.to_string()));
        }
        if cli.verbose {
            for line in &scan.lines {
                println!("  p{} {}", line.page, dim(&line.to_prompt_line()));
            }
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = extract_to_file(&cli.input, output_path, &config)
            .await
            .context("Extraction failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} students  {}/{} chunks  {}ms  →  {}",
                if stats.failed_chunks == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.merged_records,
                stats.sent_chunks - stats.failed_chunks,
                stats.sent_chunks,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let output = extract(&cli.input, &config)
            .await
            .context("Extraction failed")?;

        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{json}").context("Failed to write to stdout")?;

        if !cli.quiet && !show_progress {
            eprintln!(
                "Extracted {} students from {} pages in {}ms",
                output.stats.merged_records, output.stats.total_pages, output.stats.total_duration_ms
            );
            if output.stats.failed_chunks > 0 {
                eprintln!("  {} chunks failed", output.stats.failed_chunks);
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let backoff = if cli.exponential_backoff {
        Backoff::Exponential {
            base_ms: cli.retry_delay,
        }
    } else {
        Backoff::Fixed {
            delay_ms: cli.retry_delay,
        }
    };

    let mut builder = ExtractionConfig::builder()
        .chunk_size(cli.chunk_size)
        .retry(RetryPolicy {
            max_attempts: cli.max_retries,
            backoff,
        })
        .merge_policy(cli.merge_policy.into())
        .ocr_language(cli.ocr_lang.clone())
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref dir) = cli.ocr_models {
        builder = builder.ocr_model_dir(dir);
    }
    if let Some(ref level) = cli.grade_level {
        builder = builder.grade_level(level);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
