//! Error types for llama-bridge.
//!
//! Everything inside the crate propagates [`LlamaError`]. Only the host
//! boundary ([`Bridge`](crate::Bridge)) turns errors into sentinel strings,
//! via [`boundary_message`].

pub use llama_engine::{LlamaError, Result};

/// Prefix of every error string returned across the host boundary.
pub const ERROR_PREFIX: &str = "Error: ";

/// Render an error as the host-facing sentinel string.
pub fn boundary_message(err: &LlamaError) -> String {
    match err {
        LlamaError::NotInitialized => format!("{ERROR_PREFIX}Model not initialized"),
        LlamaError::EmptyInput => format!("{ERROR_PREFIX}No input tokens"),
        LlamaError::InvalidToken(_) => format!("{ERROR_PREFIX}Invalid token"),
        LlamaError::BatchAllocation(_) => format!("{ERROR_PREFIX}Batch initialization failed"),
        LlamaError::Decode { .. } | LlamaError::MissingLogits => {
            format!("{ERROR_PREFIX}Failed to process input")
        }
        other => format!("{ERROR_PREFIX}{other}"),
    }
}

/// Whether `text` is a boundary error string rather than generated output.
pub fn is_error_message(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}
