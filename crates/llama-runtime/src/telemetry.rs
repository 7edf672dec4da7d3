//! Telemetry hooks for inference performance measurement.
//!
//! Provides:
//! - [`InferenceMetrics`]: TTFT, tokens/sec, token counts and finish reason
//! - [`TelemetryHook`] trait: callback interface for real-time metric reporting
//! - [`InferenceTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`] / [`TracingTelemetry`]: built-in hooks

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use llama_engine::FinishReason;

/// Aggregate metrics from a generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceMetrics {
    /// Number of prompt tokens processed during prefill.
    pub prompt_tokens: usize,
    /// Number of tokens accepted during decode (stop token excluded).
    pub generated_tokens: usize,
    /// Time to first token in milliseconds (prefill latency).
    pub ttft_ms: f64,
    /// Tokens generated per second (decode throughput, excludes prefill).
    pub tokens_per_sec: f64,
    /// Total wall-clock time in milliseconds (prefill + decode).
    pub total_time_ms: f64,
    /// Why generation ended; `None` if the run never got past prefill.
    pub finish_reason: Option<FinishReason>,
}

impl InferenceMetrics {
    /// Prompt plus generated tokens.
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.generated_tokens
    }
}

/// Callback trait for real-time inference telemetry.
///
/// Implementations receive events at key points during generation.
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    /// Called after prefill completes. `ttft_ms` is time from start to first logits.
    fn on_prefill_complete(&self, _ttft_ms: f64) {}

    /// Called after each accepted token.
    fn on_token_generated(&self, _token_idx: usize, _elapsed_ms: f64) {}

    /// Called when generation finishes with the full metrics summary.
    fn on_generation_complete(&self, _metrics: &InferenceMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Collects metrics into a retrievable report.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<InferenceMetrics>>>,
    runs: Arc<Mutex<usize>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the last completed generation's metrics.
    pub fn last_metrics(&self) -> Option<InferenceMetrics> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of completed generations observed.
    pub fn runs(&self) -> usize {
        *self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(metrics.clone());
        *self.runs.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

/// Emits a `tracing` event per completed generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_prefill_complete(&self, ttft_ms: f64) {
        tracing::debug!(ttft_ms, "prefill complete");
    }

    fn on_generation_complete(&self, metrics: &InferenceMetrics) {
        tracing::info!(
            prompt_tokens = metrics.prompt_tokens,
            generated_tokens = metrics.generated_tokens,
            ttft_ms = metrics.ttft_ms,
            tokens_per_sec = metrics.tokens_per_sec,
            total_time_ms = metrics.total_time_ms,
            finish_reason = ?metrics.finish_reason,
            "generation complete"
        );
    }
}

/// Records timestamps during inference to compute [`InferenceMetrics`].
///
/// Usage:
/// 1. Call [`InferenceTimer::new`] at generation start
/// 2. Call [`InferenceTimer::mark_prefill_complete`] after prefill
/// 3. Call [`InferenceTimer::mark_token`] after each accepted token
/// 4. Call [`InferenceTimer::finish`] to compute final metrics
pub struct InferenceTimer<'h> {
    prompt_tokens: usize,
    start: Instant,
    prefill_end: Option<Instant>,
    token_count: usize,
    hook: &'h dyn TelemetryHook,
}

impl<'h> InferenceTimer<'h> {
    /// Start a new timer for a generation run.
    pub fn new(prompt_tokens: usize, hook: &'h dyn TelemetryHook) -> Self {
        Self {
            prompt_tokens,
            start: Instant::now(),
            prefill_end: None,
            token_count: 0,
            hook,
        }
    }

    /// Mark prefill phase complete. Fires `on_prefill_complete`.
    pub fn mark_prefill_complete(&mut self) {
        let now = Instant::now();
        self.prefill_end = Some(now);
        let ttft_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
        self.hook.on_prefill_complete(ttft_ms);
    }

    /// Mark a token accepted. Fires `on_token_generated`.
    pub fn mark_token(&mut self) {
        self.token_count += 1;
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.hook.on_token_generated(self.token_count, elapsed_ms);
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self, finish_reason: Option<FinishReason>) -> InferenceMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;

        let ttft_ms = self
            .prefill_end
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_time_ms = total_time_ms - ttft_ms;
        let tokens_per_sec = if decode_time_ms > 0.0 && self.token_count > 0 {
            self.token_count as f64 / (decode_time_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = InferenceMetrics {
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.token_count,
            ttft_ms,
            tokens_per_sec,
            total_time_ms,
            finish_reason,
        };

        self.hook.on_generation_complete(&metrics);
        metrics
    }
}
