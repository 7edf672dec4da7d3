//! # llama-sampling
//!
//! Token selection for llama-bridge.
//!
//! After a decode step the model hands back one logit per vocabulary entry.
//! A [`TokenSelector`] turns that vector into the next token id. Selection
//! goes through a trait so other policies can be added without touching the
//! generation loop; the only policy shipped is [`Greedy`] (argmax).

use llama_engine::{LlamaError, TokenId};

/// Sampling error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("Invalid logits array: {0}")]
    InvalidLogits(String),
    #[error("No valid tokens after filtering")]
    NoValidTokens,
}

impl From<SamplingError> for LlamaError {
    fn from(err: SamplingError) -> Self {
        LlamaError::Sampling(err.to_string())
    }
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// One candidate token with its raw score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: TokenId,
    pub logit: f32,
}

/// Candidate list covering the full vocabulary, in id order.
#[derive(Debug, Clone)]
pub struct Candidates {
    data: Vec<TokenData>,
}

impl Candidates {
    /// Build candidates for ids `0..n_vocab` from `logits`.
    ///
    /// # Errors
    /// `InvalidLogits` if `n_vocab` is zero or `logits` holds fewer entries.
    pub fn new(logits: &[f32], n_vocab: usize) -> SamplingResult<Self> {
        if n_vocab == 0 {
            return Err(SamplingError::InvalidLogits("empty vocabulary".into()));
        }
        if logits.len() < n_vocab {
            return Err(SamplingError::InvalidLogits(format!(
                "{} logits for a vocabulary of {n_vocab}",
                logits.len()
            )));
        }

        let data = logits[..n_vocab]
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenData {
                id: i as TokenId,
                logit,
            })
            .collect();

        Ok(Self { data })
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Strategy that picks the next token from a candidate list.
pub trait TokenSelector: Send {
    /// Choose one token id.
    fn select(&mut self, candidates: &Candidates) -> SamplingResult<TokenId>;

    /// Policy name for logs.
    fn name(&self) -> &'static str;
}

/// Greedy policy: highest logit wins, first-seen wins ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy;

impl Greedy {
    pub fn new() -> Self {
        Self
    }
}

impl TokenSelector for Greedy {
    fn select(&mut self, candidates: &Candidates) -> SamplingResult<TokenId> {
        let mut iter = candidates.as_slice().iter();
        let mut best = iter.next().ok_or(SamplingError::NoValidTokens)?;
        for candidate in iter {
            // strict `>` keeps the lowest index on ties
            if candidate.logit > best.logit {
                best = candidate;
            }
        }
        Ok(best.id)
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}
