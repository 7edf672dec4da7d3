//! Traits for the external forward-pass primitive.
//!
//! The bridge never does tensor math itself. A [`Backend`] loads a [`Model`];
//! the model owns a [`Vocab`] and creates a [`Context`] that holds the mutable
//! recurrent state (key/value cache) and runs the forward pass on a [`Batch`].

use std::path::Path;

use crate::batch::Batch;
use crate::params::{ContextParams, ModelParams};
use crate::{Result, TokenId};

/// Process-level runtime of an inference library.
///
/// `init` and `free` bracket every model the backend loads. Implementations
/// must tolerate `free` being called when `init` never ran.
pub trait Backend: Send {
    /// Bring up the runtime (thread pools, device handles, ...).
    fn init(&mut self) -> Result<()>;

    /// Tear the runtime down again.
    fn free(&mut self);

    /// Load weights and vocabulary from `path`.
    fn load_model(&mut self, path: &Path, params: &ModelParams) -> Result<Box<dyn Model>>;
}

/// Loaded weights plus vocabulary. Immutable after load.
pub trait Model: Send {
    /// The model's vocabulary.
    fn vocab(&self) -> &dyn Vocab;

    /// Create a decode context bound to this model.
    ///
    /// The returned context must be dropped before the model.
    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>>;

    /// Short human-readable description for logs.
    fn description(&self) -> String {
        format!("model with {} tokens", self.vocab().n_tokens())
    }
}

/// Token <-> text mapping, including special markers.
pub trait Vocab {
    /// Number of tokens in the vocabulary.
    fn n_tokens(&self) -> usize;

    /// Begin-of-sequence marker.
    fn bos(&self) -> TokenId;

    /// End-of-sequence (stop) marker.
    fn eos(&self) -> TokenId;

    /// Tokenize `text` into `tokens`.
    ///
    /// Returns the number of ids written. When `tokens` is too small, returns
    /// the negated number of ids that would have been needed.
    fn tokenize(
        &self,
        text: &str,
        tokens: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32;

    /// Write the text piece for `token` into `buf`.
    ///
    /// Returns the number of bytes written, or the negated required length
    /// when `buf` is too small. Special tokens render only when `special` is
    /// set; otherwise they produce zero bytes.
    fn token_to_piece(&self, token: TokenId, buf: &mut [u8], special: bool) -> i32;
}

/// Mutable decode state (key/value cache) bound to one model.
pub trait Context: Send {
    /// Parameters the context was created with.
    fn params(&self) -> &ContextParams;

    /// Forget every cached position.
    fn clear_kv(&mut self);

    /// Number of positions currently held in the recurrent state.
    fn n_past(&self) -> usize;

    /// Run the forward pass over `batch`, advancing the recurrent state.
    ///
    /// Returns 0 on success. Positive codes are recoverable (e.g. no free
    /// cache slot), negative codes are hard failures.
    fn decode(&mut self, batch: &Batch) -> i32;

    /// Logits for the last entry of the previous batch that requested them.
    fn logits(&self) -> Option<&[f32]>;
}
