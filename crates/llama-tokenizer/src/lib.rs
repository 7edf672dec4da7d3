//! # llama-tokenizer
//!
//! Vocabulary access for llama-bridge.
//!
//! This crate provides:
//! - [`VocabAdapter`]: bounded, error-checked tokenize / detokenize on top of
//!   the raw-buffer [`Vocab`] primitive
//! - [`PieceDecoder`]: streaming assembly of token pieces into valid UTF-8
//! - [`ByteVocab`]: a byte-level reference vocabulary for testing and the
//!   tiny reference backend

mod byte_vocab;

pub use byte_vocab::ByteVocab;

use llama_engine::{LlamaError, Result, TokenId, Vocab};

/// Maximum number of ids a single `tokenize` call may produce.
pub const DEFAULT_TOKEN_CAPACITY: usize = 1024;

/// Maximum number of bytes a single token piece may occupy.
pub const DEFAULT_PIECE_CAPACITY: usize = 256;

/// Bounded view over a model's vocabulary.
///
/// Tokenization adds the begin marker and parses special-token text.
/// Capacities are hard limits: overflowing either buffer is an error, never a
/// silent truncation.
#[derive(Clone, Copy)]
pub struct VocabAdapter<'v> {
    vocab: &'v dyn Vocab,
    token_capacity: usize,
    piece_capacity: usize,
}

impl<'v> VocabAdapter<'v> {
    /// Adapter with the default 1024-token / 256-byte capacities.
    pub fn new(vocab: &'v dyn Vocab) -> Self {
        Self::with_capacities(vocab, DEFAULT_TOKEN_CAPACITY, DEFAULT_PIECE_CAPACITY)
    }

    pub fn with_capacities(
        vocab: &'v dyn Vocab,
        token_capacity: usize,
        piece_capacity: usize,
    ) -> Self {
        Self {
            vocab,
            token_capacity,
            piece_capacity,
        }
    }

    /// Vocabulary size.
    pub fn n_vocab(&self) -> usize {
        self.vocab.n_tokens()
    }

    /// Stop-token id.
    pub fn eos(&self) -> TokenId {
        self.vocab.eos()
    }

    pub fn bos(&self) -> TokenId {
        self.vocab.bos()
    }

    pub fn token_capacity(&self) -> usize {
        self.token_capacity
    }

    pub fn piece_capacity(&self) -> usize {
        self.piece_capacity
    }

    /// Convert text into token ids, in order.
    ///
    /// # Errors
    /// `Tokenization` when the primitive reports a negative count (internal
    /// failure or more ids than the buffer holds).
    pub fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        let mut tokens = vec![0; self.token_capacity];
        let n = self.vocab.tokenize(text, &mut tokens, true, true);

        if n < 0 {
            return Err(LlamaError::Tokenization(format!(
                "tokenizer returned {n} (needs {} slots, capacity {})",
                n.unsigned_abs(),
                self.token_capacity
            )));
        }

        let n = n as usize;
        if n > self.token_capacity {
            return Err(LlamaError::Tokenization(format!(
                "tokenizer wrote {n} ids into a buffer of {}",
                self.token_capacity
            )));
        }

        tokens.truncate(n);
        Ok(tokens)
    }

    /// Raw bytes of the piece for `token`. Special tokens render as empty.
    ///
    /// # Errors
    /// - `InvalidToken`: `token` is outside `[0, n_vocab)`
    /// - `PieceOverflow`: the piece does not fit the piece buffer
    pub fn piece(&self, token: TokenId) -> Result<Vec<u8>> {
        if token < 0 || token as usize >= self.n_vocab() {
            return Err(LlamaError::InvalidToken(token));
        }

        let mut buf = vec![0u8; self.piece_capacity];
        let n = self.vocab.token_to_piece(token, &mut buf, false);

        if n < 0 {
            return Err(LlamaError::PieceOverflow {
                needed: n.unsigned_abs() as usize,
                capacity: self.piece_capacity,
            });
        }

        let n = n as usize;
        if n > self.piece_capacity {
            return Err(LlamaError::PieceOverflow {
                needed: n,
                capacity: self.piece_capacity,
            });
        }

        buf.truncate(n);
        Ok(buf)
    }

    /// Text for a single token. Invalid UTF-8 is replaced with U+FFFD.
    pub fn detokenize(&self, token: TokenId) -> Result<String> {
        let bytes = self.piece(token)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Streaming decoder that turns token pieces into valid UTF-8 text.
///
/// A multi-byte character may be split across several tokens. The decoder
/// keeps the incomplete tail and releases it once the character is complete.
/// Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Clone, Default)]
pub struct PieceDecoder {
    pending: Vec<u8>,
    emitted: String,
}

impl PieceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one piece; returns the text that became complete (possibly empty).
    pub fn push(&mut self, piece: &[u8]) -> String {
        self.pending.extend_from_slice(piece);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
                        out.push_str(text);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // incomplete tail, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        self.emitted.push_str(&out);
        out
    }

    /// Flush whatever is still pending, lossily.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        self.emitted.push_str(&out);
        out
    }

    /// Whether an incomplete character is buffered.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Everything released so far.
    pub fn emitted(&self) -> &str {
        &self.emitted
    }

    /// Consume the decoder, returning everything released.
    pub fn into_text(self) -> String {
        self.emitted
    }
}
