//! # llama-cli
//!
//! Command-line front end for llama-bridge.
//!
//! Wires: model file → session → tokenizer → generation loop → stdout.
//! Runs on the deterministic tiny reference backend, so every command works
//! without an external inference library.

use std::io::{BufRead, Write};
use std::path::Path;

use llama_bridge::{BridgeConfig, Conversation, Generation, Session, Template};
use llama_engine::{LlamaError, TokenId};
use llama_runtime::{InferenceMetrics, TinyBackend, TinyModelSpec, TracingTelemetry};

/// Errors from the command-line pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("bridge error: {0}")]
    Llama(#[from] LlamaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} already exists (use --force to overwrite)")]
    Exists(String),
}

pub type CliResult<T> = std::result::Result<T, CliError>;

/// Config from `path`, or the defaults.
pub fn load_config(path: Option<&Path>) -> CliResult<BridgeConfig> {
    match path {
        Some(path) => Ok(BridgeConfig::from_file(path)?),
        None => Ok(BridgeConfig::default()),
    }
}

/// Write a tiny model file.
pub fn init_model(path: &Path, spec: &TinyModelSpec, force: bool) -> CliResult<()> {
    if path.exists() && !force {
        return Err(CliError::Exists(path.display().to_string()));
    }
    spec.validate()?;
    spec.save(path)?;
    tracing::info!(path = %path.display(), name = %spec.name, "wrote tiny model");
    Ok(())
}

/// Session over the tiny backend with `model` loaded.
pub fn open_session(model: &Path, config: BridgeConfig) -> CliResult<Session<TinyBackend>> {
    let session = Session::with_config(TinyBackend::new(), config)
        .with_telemetry(std::sync::Arc::new(TracingTelemetry));
    session.initialize(model)?;
    Ok(session)
}

/// Token ids for `text` as a JSON array.
pub fn tokenize_json(session: &Session<TinyBackend>, text: &str) -> CliResult<String> {
    let ids: Vec<TokenId> = session.tokenize(text)?;
    Ok(serde_json::to_string(&ids)?)
}

/// Generate from `prompt`, streaming fragments to `out` as they arrive.
pub fn generate<W: Write>(
    session: &Session<TinyBackend>,
    prompt: &str,
    out: &mut W,
) -> CliResult<Generation> {
    let tokens = session.tokenize(prompt)?;
    let mut write_err = None;
    let mut observer = |fragment: &str| {
        if write_err.is_none() {
            if let Err(e) = out.write_all(fragment.as_bytes()).and_then(|_| out.flush()) {
                write_err = Some(e);
            }
        }
    };
    let generation = session.generate(&tokens, Some(&mut observer))?;
    if let Some(e) = write_err {
        return Err(e.into());
    }
    writeln!(out)?;
    Ok(generation)
}

/// One-line human summary of a run.
pub fn metrics_summary(metrics: &InferenceMetrics) -> String {
    let reason = metrics
        .finish_reason
        .map(|r| r.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "prompt {} tok | generated {} tok | ttft {:.1} ms | {:.1} tok/s | total {:.1} ms | finish {}",
        metrics.prompt_tokens,
        metrics.generated_tokens,
        metrics.ttft_ms,
        metrics.tokens_per_sec,
        metrics.total_time_ms,
        reason
    )
}

/// Interactive chat over `input` lines.
///
/// `/reset` clears the history, `/quit` ends the loop. Returns the number of
/// answered turns.
pub fn chat_loop<R: BufRead, W: Write>(
    session: &Session<TinyBackend>,
    template: Template,
    input: R,
    out: &mut W,
) -> CliResult<usize> {
    let mut conversation = Conversation::new(template);
    let mut turns = 0;

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/reset" => {
                conversation.reset();
                writeln!(out, "[history cleared]")?;
                continue;
            }
            _ => {}
        }

        let mut write_err = None;
        let mut observer = |fragment: &str| {
            if write_err.is_none() {
                if let Err(e) = out.write_all(fragment.as_bytes()) {
                    write_err = Some(e);
                }
            }
        };
        let result = conversation.respond(session, line, Some(&mut observer));
        if let Some(e) = write_err {
            return Err(e.into());
        }
        match result {
            Ok(_) => turns += 1,
            Err(e) => {
                tracing::warn!(error = %e, "turn failed");
                write!(out, "{}", llama_bridge::boundary_message(&e))?;
            }
        }
        writeln!(out)?;
        out.flush()?;
    }

    Ok(turns)
}
