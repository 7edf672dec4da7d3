//! Inference engine for a single loaded context.
//!
//! Manages the two-phase inference process:
//! - **Prefill**: processes the whole prompt in one batch, populating the
//!   recurrent state and producing logits for the last position.
//! - **Decode**: generates tokens one at a time autoregressively.
//!
//! The engine borrows everything it needs from the session for the duration
//! of one request; it owns no state of its own.

use llama_engine::{BatchBuilder, Context, FinishReason, LlamaError, Pos, Result, SeqId, TokenId};
use llama_runtime::{InferenceMetrics, InferenceTimer, TelemetryHook};
use llama_sampling::{Candidates, TokenSelector};
use llama_tokenizer::{PieceDecoder, VocabAdapter};

use crate::stream::{StreamEmitter, TokenObserver};

/// Sequence slot used for every batch (single-sequence engine).
pub const SEQ_ID: SeqId = 0;

/// Result of a completed generation request.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Concatenation of every emitted fragment.
    pub text: String,

    /// Why the loop stopped.
    pub finish_reason: FinishReason,

    /// Timing and token counts.
    pub metrics: InferenceMetrics,
}

/// Borrowed view of a session's model, context and sampler.
pub struct InferenceEngine<'a> {
    context: &'a mut dyn Context,
    vocab: VocabAdapter<'a>,
    batches: &'a BatchBuilder,
    selector: &'a mut dyn TokenSelector,
    telemetry: &'a dyn TelemetryHook,
    max_new_tokens: usize,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(
        context: &'a mut dyn Context,
        vocab: VocabAdapter<'a>,
        batches: &'a BatchBuilder,
        selector: &'a mut dyn TokenSelector,
        telemetry: &'a dyn TelemetryHook,
        max_new_tokens: usize,
    ) -> Self {
        InferenceEngine {
            context,
            vocab,
            batches,
            selector,
            telemetry,
            max_new_tokens,
        }
    }

    /// Run one forward pass over `batch`.
    ///
    /// The batch stays owned by the caller and is released by its scope.
    pub fn decode(&mut self, batch: &llama_engine::Batch) -> Result<()> {
        let code = self.context.decode(batch);
        if code != 0 {
            return Err(LlamaError::Decode { code });
        }
        Ok(())
    }

    /// Phase 1: decode the whole prompt at positions `0..len`, logits on the
    /// last slot.
    pub fn prefill(&mut self, tokens: &[TokenId]) -> Result<()> {
        let batch = self.batches.build(tokens, 0, SEQ_ID, true)?;
        self.decode(&batch)
    }

    /// Select the next token from the logits of the previous decode.
    pub fn next_token(&mut self) -> Result<TokenId> {
        let logits = self.context.logits().ok_or(LlamaError::MissingLogits)?;
        let candidates = Candidates::new(logits, self.vocab.n_vocab())?;
        Ok(self.selector.select(&candidates)?)
    }

    /// Phase 2: one incremental step for `token` at `pos`.
    pub fn decode_step(&mut self, token: TokenId, pos: Pos) -> Result<()> {
        let batch = self.batches.single(token, pos, SEQ_ID)?;
        self.decode(&batch)
    }

    /// Run the complete generation pipeline.
    ///
    /// 1. Clear the recurrent state and prefill the prompt
    /// 2. Select, stream and feed back one token per iteration
    /// 3. Stop on the stop token, a failed step, or `max_new_tokens`
    ///
    /// Failures up to and including the prompt decode are returned as
    /// errors. A token whose text cannot be looked up contributes no text but
    /// is still fed back. A later selection or decode failure ends the loop
    /// early and the text produced so far is returned with
    /// [`FinishReason::DecodeFailed`].
    pub fn generate(
        &mut self,
        tokens: &[TokenId],
        observer: Option<&mut dyn TokenObserver>,
    ) -> Result<Generation> {
        self.context.clear_kv();
        if tokens.is_empty() {
            return Err(LlamaError::EmptyInput);
        }

        let mut timer = InferenceTimer::new(tokens.len(), self.telemetry);
        if let Err(e) = self.prefill(tokens) {
            tracing::error!(error = %e, prompt_tokens = tokens.len(), "prompt decode failed");
            return Err(e);
        }
        timer.mark_prefill_complete();

        let eos = self.vocab.eos();
        let mut emitter = StreamEmitter::new(observer);
        let mut decoder = PieceDecoder::new();
        let mut finish_reason = FinishReason::Length;

        for i in 0..self.max_new_tokens {
            let token = match self.next_token() {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        step = i,
                        "token selection failed, truncating output"
                    );
                    finish_reason = FinishReason::DecodeFailed;
                    break;
                }
            };
            if token == eos {
                finish_reason = FinishReason::Stop;
                break;
            }

            timer.mark_token();
            match self.vocab.piece(token) {
                Ok(piece) => {
                    let fragment = decoder.push(&piece);
                    emitter.emit(&fragment);
                    tracing::debug!(step = i, token, fragment = %fragment, "token accepted");
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        step = i,
                        token,
                        "piece lookup failed, skipping text"
                    );
                }
            }

            let step = Pos::try_from(tokens.len() + i)
                .map_err(|_| LlamaError::BatchAllocation("position overflow".into()))
                .and_then(|pos| self.decode_step(token, pos));
            if let Err(e) = step {
                tracing::warn!(error = %e, step = i, "decode step failed, truncating output");
                finish_reason = FinishReason::DecodeFailed;
                break;
            }
        }

        let tail = decoder.finish();
        emitter.emit(&tail);

        let metrics = timer.finish(Some(finish_reason));
        tracing::debug!(
            fragments = emitter.emitted(),
            chars = decoder.emitted().chars().count(),
            finish_reason = %finish_reason,
            "generation finished"
        );

        Ok(Generation {
            text: decoder.into_text(),
            finish_reason,
            metrics,
        })
    }
}
