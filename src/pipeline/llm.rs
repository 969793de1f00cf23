//! Extraction worker: send one chunk to the completion backend and parse
//! the answer, with bounded retries.
//!
//! ## Retry Strategy
//!
//! Every attempt is wrapped in a per-call timeout. Transport errors,
//! timeouts and unparseable responses are all retried the same way, up to
//! [`RetryPolicy::max_attempts`], pausing [`RetryPolicy::delay_before`]
//! between attempts (fixed 1.5 s by default). When the budget is spent the
//! chunk yields no records and a [`ChunkError`]; the error never escapes the
//! chunk. If every attempt timed out the error is [`ChunkError::TimedOut`],
//! otherwise [`ChunkError::RetriesExhausted`].

use crate::config::{ExtractionConfig, RetryPolicy};
use crate::error::{BackendError, ChunkError};
use crate::output::ChunkResult;
use crate::pipeline::chunk::Chunk;
use crate::pipeline::postprocess::parse_records;
use crate::prompts::{extraction_prompt, DEFAULT_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Request sent to a completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    /// System instructions, if the backend supports a separate channel.
    pub system: Option<String>,
    pub prompt: String,
}

/// Raw text returned by a completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub text: String,
}

/// An opaque text-completion service.
///
/// The pipeline layers its own JSON extraction and retry policy on top, so
/// implementations should make exactly one call and report failures as
/// [`BackendError::Transport`].
pub trait CompletionBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, BackendError>>;
}

/// [`CompletionBackend`] over an `edgequake-llm` chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

impl CompletionBackend for LlmBackend {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, BackendError>> {
        Box::pin(async move {
            let mut messages = Vec::with_capacity(2);
            if let Some(ref system) = request.system {
                messages.push(ChatMessage::system(system.as_str()));
            }
            messages.push(ChatMessage::user(request.prompt.as_str()));

            let response = self
                .provider
                .chat(&messages, Some(&self.options))
                .await
                .map_err(|e| BackendError::Transport(format!("{}", e)))?;

            debug!(
                "{}: {} input tokens, {} output tokens",
                request.model, response.prompt_tokens, response.completion_tokens
            );
            Ok(CompletionResponse {
                text: response.content,
            })
        })
    }
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Outcome of [`run_with_retry`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ChunkError>,
    /// Attempts made, 1-based.
    pub attempts: u32,
}

/// Run `attempt` until it succeeds or `policy` is exhausted, bounding each
/// call by `timeout`. `attempt` receives the 0-based attempt number.
pub async fn run_with_retry<T, F, Fut>(
    chunk: usize,
    policy: &RetryPolicy,
    timeout: Duration,
    mut attempt: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_err: Option<BackendError> = None;
    let mut all_timeouts = true;

    for n in 0..max_attempts {
        if n > 0 {
            let delay = policy.delay_before(n);
            warn!(
                "Chunk {}: retry {}/{} after {}ms",
                chunk,
                n,
                max_attempts - 1,
                delay.as_millis()
            );
            sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(timeout, attempt(n)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                secs: timeout.as_secs(),
            }),
        };

        match outcome {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: n + 1,
                }
            }
            Err(e) => {
                warn!("Chunk {}: attempt {} failed: {}", chunk, n + 1, e);
                all_timeouts &= e.is_timeout();
                last_err = Some(e);
            }
        }
    }

    let error = if all_timeouts {
        ChunkError::TimedOut {
            chunk,
            attempts: max_attempts,
            secs: timeout.as_secs(),
        }
    } else {
        ChunkError::RetriesExhausted {
            chunk,
            attempts: max_attempts,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        }
    };

    RetryOutcome {
        result: Err(error),
        attempts: max_attempts,
    }
}

/// Send one chunk to the backend and parse its records.
///
/// Always returns a `ChunkResult`: a chunk that exhausts its attempts has
/// empty `records` and `error` set, so one bad chunk never aborts the run.
pub async fn extract_chunk(
    backend: &dyn CompletionBackend,
    chunk: &Chunk,
    headers: &[String],
    config: &ExtractionConfig,
) -> ChunkResult {
    let start = Instant::now();
    let request = CompletionRequest {
        model: config
            .model
            .clone()
            .unwrap_or_else(|| crate::extract::DEFAULT_MODEL.to_string()),
        system: Some(
            config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        ),
        prompt: extraction_prompt(headers, &chunk.text()),
    };
    let request = &request;
    let fill = config.fill_missing_average;

    let outcome = run_with_retry(chunk.index, &config.retry, config.api_timeout(), |_| async move {
        let response = backend.complete(request).await?;
        parse_records(&response.text, headers, fill)
    })
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match outcome.result {
        Ok(records) => {
            debug!(
                "Chunk {}: {} records in {}ms",
                chunk.index,
                records.len(),
                duration_ms
            );
            ChunkResult {
                index: chunk.index,
                records,
                attempts: outcome.attempts,
                duration_ms,
                error: None,
            }
        }
        Err(error) => ChunkResult {
            index: chunk.index,
            records: Vec::new(),
            attempts: outcome.attempts,
            duration_ms,
            error: Some(error),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Backoff;
    use std::sync::Mutex;

    /// Backend that replays a script of responses; `None` hangs forever.
    pub(crate) struct ScriptedBackend {
        script: Mutex<Vec<Option<Result<String, BackendError>>>>,
        pub calls: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<Option<Result<String, BackendError>>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl CompletionBackend for ScriptedBackend {
        fn complete<'a>(
            &'a self,
            request: &'a CompletionRequest,
        ) -> BoxFuture<'a, Result<CompletionResponse, BackendError>> {
            self.calls.lock().unwrap().push(request.clone());
            let next = self.script.lock().unwrap().pop().unwrap_or(Some(Ok("[]".into())));
            Box::pin(async move {
                match next {
                    Some(result) => result.map(|text| CompletionResponse { text }),
                    None => futures::future::pending().await,
                }
            })
        }
    }

    fn chunk() -> Chunk {
        Chunk {
            index: 2,
            lines: vec!["[MALE] 1. DELACRUZ, JUAN | 90 | 85".into()],
        }
    }

    fn headers() -> Vec<String> {
        vec!["subject1".into(), "subject2".into()]
    }

    const GOOD: &str = r#"[{"name":"DELACRUZ, JUAN","gender":"MALE","grades":{"subject1":"90","subject2":"85"},"average":null}]"#;

    #[test]
    fn scripted_hang_stays_pending() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let backend = ScriptedBackend::new(vec![None, Some(Ok("[]".into()))]);
        let request = CompletionRequest {
            model: "m".into(),
            system: None,
            prompt: "p".into(),
        };

        let mut hung = task::spawn(backend.complete(&request));
        assert_pending!(hung.poll());
        assert_pending!(hung.poll());

        let mut answered = task::spawn(backend.complete(&request));
        assert_ready_eq!(
            answered.poll(),
            Ok(CompletionResponse { text: "[]".into() })
        );
        assert_eq!(backend.call_count(), 2);
    }

    #[test]
    fn build_options_defaults() {
        let config = ExtractionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success() {
        let backend = ScriptedBackend::new(vec![Some(Ok(GOOD.into()))]);
        let result = extract_chunk(&backend, &chunk(), &headers(), &ExtractionConfig::default()).await;
        assert_eq!(result.error, None);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].grades["subject1"], "90");

        let calls = backend.calls.lock().unwrap();
        assert!(calls[0].prompt.contains("DELACRUZ"));
        assert_eq!(calls[0].system.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_then_valid_is_retried() {
        let backend = ScriptedBackend::new(vec![
            Some(Ok("I could not find any students".into())),
            Some(Err(BackendError::Transport("503".into()))),
            Some(Ok(format!("```json\n{GOOD}\n```"))),
        ]);
        let result = extract_chunk(&backend, &chunk(), &headers(), &ExtractionConfig::default()).await;
        assert_eq!(result.error, None);
        assert_eq!(result.attempts, 3);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_yields_empty_records() {
        let backend = ScriptedBackend::new(vec![
            Some(Err(BackendError::Transport("boom".into()))),
            Some(Ok("not json".into())),
            Some(Err(BackendError::Transport("boom again".into()))),
            Some(Ok(GOOD.into())),
        ]);
        let result = extract_chunk(&backend, &chunk(), &headers(), &ExtractionConfig::default()).await;
        assert!(result.records.is_empty());
        assert_eq!(result.attempts, 3);
        assert_eq!(backend.call_count(), 3, "never a fourth attempt");
        match result.error {
            Some(ChunkError::RetriesExhausted { chunk, attempts, detail }) => {
                assert_eq!(chunk, 2);
                assert_eq!(attempts, 3);
                assert!(detail.contains("boom again"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_times_out_distinctly() {
        let backend = ScriptedBackend::new(vec![None, None, None]);
        let config = ExtractionConfig::builder().api_timeout_secs(5).build().unwrap();
        let result = extract_chunk(&backend, &chunk(), &headers(), &config).await;
        assert!(result.records.is_empty());
        assert_eq!(
            result.error,
            Some(ChunkError::TimedOut {
                chunk: 2,
                attempts: 3,
                secs: 5
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_between_attempts() {
        let start = tokio::time::Instant::now();
        let outcome: RetryOutcome<()> = run_with_retry(
            0,
            &RetryPolicy::default(),
            Duration::from_secs(60),
            |_| async { Err(BackendError::Transport("x".into())) },
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_policy_is_honoured() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Backoff::Exponential { base_ms: 100 },
        };
        let start = tokio::time::Instant::now();
        let outcome: RetryOutcome<()> =
            run_with_retry(0, &policy, Duration::from_secs(60), |_| async {
                Err(BackendError::Parse("x".into()))
            })
            .await;
        assert_eq!(outcome.attempts, 4);
        assert_eq!(start.elapsed(), Duration::from_millis(100 + 200 + 400));
    }
}
