//! Load and context parameters handed to the backend.

use serde::Deserialize;

use crate::{LlamaError, Result};

/// Parameters for loading a model file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelParams {
    /// Number of layers to offload to an accelerator. 0 = CPU only.
    #[serde(default)]
    pub n_gpu_layers: u32,

    /// Memory-map the model file instead of reading it.
    #[serde(default = "default_use_mmap")]
    pub use_mmap: bool,

    /// Only load the vocabulary, skip the weights.
    #[serde(default)]
    pub vocab_only: bool,
}

fn default_use_mmap() -> bool {
    true
}

impl Default for ModelParams {
    fn default() -> Self {
        ModelParams {
            n_gpu_layers: 0,
            use_mmap: default_use_mmap(),
            vocab_only: false,
        }
    }
}

/// Shape of the decode context created from a model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextParams {
    /// Context window in tokens (size of the recurrent state).
    #[serde(default = "default_n_ctx")]
    pub n_ctx: u32,

    /// Maximum number of tokens a single decode call may carry.
    #[serde(default = "default_n_batch")]
    pub n_batch: u32,

    /// Threads the forward pass may use internally.
    #[serde(default = "default_n_threads")]
    pub n_threads: u32,
}

fn default_n_ctx() -> u32 {
    2048
}
fn default_n_batch() -> u32 {
    512
}
fn default_n_threads() -> u32 {
    4
}

impl Default for ContextParams {
    fn default() -> Self {
        ContextParams {
            n_ctx: default_n_ctx(),
            n_batch: default_n_batch(),
            n_threads: default_n_threads(),
        }
    }
}

impl ContextParams {
    /// Reject zero-sized windows, batches and thread pools.
    pub fn validate(&self) -> Result<()> {
        if self.n_ctx == 0 {
            return Err(LlamaError::Config("n_ctx must be > 0".into()));
        }
        if self.n_batch == 0 {
            return Err(LlamaError::Config("n_batch must be > 0".into()));
        }
        if self.n_threads == 0 {
            return Err(LlamaError::Config("n_threads must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_defaults_match_bridge_constants() {
        let params = ContextParams::default();
        assert_eq!(params.n_ctx, 2048);
        assert_eq!(params.n_batch, 512);
        assert_eq!(params.n_threads, 4);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn zero_batch_is_rejected() {
        let params = ContextParams {
            n_batch: 0,
            ..ContextParams::default()
        };
        assert!(matches!(params.validate(), Err(LlamaError::Config(_))));
    }

    #[test]
    fn model_params_default_to_mmap() {
        let params = ModelParams::default();
        assert!(params.use_mmap);
        assert!(!params.vocab_only);
        assert_eq!(params.n_gpu_layers, 0);
    }
}
