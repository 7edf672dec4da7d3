//! # llama-engine
//!
//! The "narrow waist" of the llama-bridge stack. Defines the traits through
//! which the bridge talks to an external forward-pass primitive ([`Backend`],
//! [`Model`], [`Vocab`], [`Context`]), the positional [`Batch`] submitted to
//! it, and the error taxonomy every other crate shares.
//!
//! ## Design Notes
//!
//! ### Raw-buffer vocabulary calls
//! [`Vocab::tokenize`] and [`Vocab::token_to_piece`] write into caller-owned
//! buffers and return a signed count, mirroring the C-style primitives they
//! usually wrap. Bounds checking and error conversion happen one layer up, in
//! `llama-tokenizer`.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility. Valid ids are
//! non-negative and below the vocabulary size; negative ids are rejected when
//! a batch is built.

pub mod backend;
pub mod batch;
pub mod params;

pub use backend::{Backend, Context, Model, Vocab};
pub use batch::{Batch, BatchBuilder, BatchEntry};
pub use params::{ContextParams, ModelParams};

pub type Result<T> = std::result::Result<T, LlamaError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Sequence slot a batch entry belongs to.
pub type SeqId = i32;

/// Position of a token within its sequence.
pub type Pos = i32;

/// Top-level error type for all bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum LlamaError {
    #[error("initialization failed: {0}")]
    Initialization(String),
    #[error("model not initialized")]
    NotInitialized,
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("batch allocation failed: {0}")]
    BatchAllocation(String),
    #[error("invalid token: {0}")]
    InvalidToken(TokenId),
    #[error("decode failed with code {code}")]
    Decode { code: i32 },
    #[error("no input tokens")]
    EmptyInput,
    #[error("piece needs {needed} bytes but buffer holds {capacity}")]
    PieceOverflow { needed: usize, capacity: usize },
    #[error("decode produced no logits")]
    MissingLogits,
    #[error("sampling failed: {0}")]
    Sampling(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why a generation loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishReason {
    /// The model selected the stop token.
    Stop,
    /// The generated-token cap was reached.
    Length,
    /// An incremental decode step failed; output was truncated.
    DecodeFailed,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::Length => write!(f, "length"),
            FinishReason::DecodeFailed => write!(f, "decode_failed"),
        }
    }
}

impl LlamaError {
    /// Whether the error means the session has no loaded model.
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, LlamaError::NotInitialized)
    }
}
