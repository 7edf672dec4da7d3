//! Session configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```json
//! {
//!   "context": { "n_ctx": 2048, "n_batch": 512, "n_threads": 4 },
//!   "max_new_tokens": 100
//! }
//! ```

use std::path::Path;

use llama_engine::{ContextParams, LlamaError, ModelParams, Result};
use serde::Deserialize;

/// Knobs for a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Shape of the decode context.
    #[serde(default)]
    pub context: ContextParams,

    /// Parameters used when loading the model file.
    #[serde(default)]
    pub model: ModelParams,

    /// Upper bound on generated tokens per request.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Maximum ids a single tokenize call may return.
    #[serde(default = "default_token_capacity")]
    pub token_capacity: usize,

    /// Maximum bytes of a single token piece.
    #[serde(default = "default_piece_capacity")]
    pub piece_capacity: usize,
}

fn default_max_new_tokens() -> usize {
    100
}
fn default_token_capacity() -> usize {
    llama_tokenizer::DEFAULT_TOKEN_CAPACITY
}
fn default_piece_capacity() -> usize {
    llama_tokenizer::DEFAULT_PIECE_CAPACITY
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            context: ContextParams::default(),
            model: ModelParams::default(),
            max_new_tokens: default_max_new_tokens(),
            token_capacity: default_token_capacity(),
            piece_capacity: default_piece_capacity(),
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON config string and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LlamaError::Config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LlamaError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        if self.max_new_tokens == 0 {
            return Err(LlamaError::Config("max_new_tokens must be > 0".into()));
        }
        if self.token_capacity == 0 {
            return Err(LlamaError::Config("token_capacity must be > 0".into()));
        }
        if self.piece_capacity == 0 {
            return Err(LlamaError::Config("piece_capacity must be > 0".into()));
        }
        Ok(())
    }
}
