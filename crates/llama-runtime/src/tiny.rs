//! Deterministic tiny reference backend.
//!
//! A "model file" is a small JSON [`TinyModelSpec`]; weights are generated
//! from its seed with xorshift64, so the same file always produces the same
//! logits. One mixing layer per position:
//!
//! ```text
//! x_p = embed(t_p) + mean(embed(t_0..=t_p))
//! h_p = tanh(x_p @ W)
//! logits_p = h_p @ lm_head
//! ```
//!
//! The context keeps one hidden state per position as its recurrent cache and
//! enforces `n_ctx` / `n_batch` the way a real kernel would report them.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use llama_engine::{
    Backend, Batch, Context, ContextParams, LlamaError, Model, ModelParams, Result, Vocab,
};
use llama_tokenizer::ByteVocab;
use serde::{Deserialize, Serialize};

/// Decode return code when the context window has no room left.
pub const DECODE_NO_SLOT: i32 = 1;

/// Decode return code for a malformed batch.
pub const DECODE_INVALID_BATCH: i32 = -1;

/// Contents of a tiny model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TinyModelSpec {
    #[serde(default = "default_name")]
    pub name: String,

    /// Seed for weight generation.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Hidden width.
    #[serde(default = "default_d_model")]
    pub d_model: usize,

    /// Largest `n_ctx` a context may be created with.
    #[serde(default = "default_max_ctx")]
    pub max_ctx: u32,
}

fn default_name() -> String {
    "tiny".to_string()
}
fn default_seed() -> u64 {
    12345
}
fn default_d_model() -> usize {
    32
}
fn default_max_ctx() -> u32 {
    4096
}

impl Default for TinyModelSpec {
    fn default() -> Self {
        Self {
            name: default_name(),
            seed: default_seed(),
            d_model: default_d_model(),
            max_ctx: default_max_ctx(),
        }
    }
}

impl TinyModelSpec {
    /// Read and validate a model file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            LlamaError::Initialization(format!("cannot read {}: {e}", path.display()))
        })?;
        let spec: Self = serde_json::from_str(&raw).map_err(|e| {
            LlamaError::Initialization(format!("malformed model file {}: {e}", path.display()))
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Write the model description as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LlamaError::Config(format!("cannot serialize model spec: {e}")))?;
        fs::write(path, json)
            .map_err(|e| LlamaError::Config(format!("cannot write {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.d_model == 0 {
            return Err(LlamaError::Config("d_model must be > 0".into()));
        }
        if self.max_ctx == 0 {
            return Err(LlamaError::Config("max_ctx must be > 0".into()));
        }
        Ok(())
    }
}

/// Simple seeded RNG for weight initialization (xorshift64).
struct WeightRng {
    state: u64,
}

impl WeightRng {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        ((self.state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 0.5
    }

    fn fill(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.next_f32()).collect()
    }
}

struct TinyWeights {
    d_model: usize,
    n_vocab: usize,
    // [n_vocab, d_model]
    embeddings: Vec<f32>,
    // [d_model, d_model]
    w_mix: Vec<f32>,
    // [d_model, n_vocab]
    lm_head: Vec<f32>,
}

impl TinyWeights {
    fn generate(spec: &TinyModelSpec, n_vocab: usize) -> Self {
        let mut rng = WeightRng::new(spec.seed);
        let d = spec.d_model;
        Self {
            d_model: d,
            n_vocab,
            embeddings: rng.fill(n_vocab * d),
            w_mix: rng.fill(d * d),
            lm_head: rng.fill(d * n_vocab),
        }
    }

    fn embed(&self, token: usize) -> &[f32] {
        let offset = token * self.d_model;
        &self.embeddings[offset..offset + self.d_model]
    }

    /// x @ W where W is [in_dim, out_dim] row-major.
    fn matvec(x: &[f32], w: &[f32], out_dim: usize) -> Vec<f32> {
        let mut out = vec![0.0; out_dim];
        for (j, &xj) in x.iter().enumerate() {
            let row = &w[j * out_dim..(j + 1) * out_dim];
            for (o, &wji) in out.iter_mut().zip(row) {
                *o += xj * wji;
            }
        }
        out
    }
}

/// Backend that loads [`TinyModelSpec`] files.
#[derive(Debug, Default)]
pub struct TinyBackend {
    initialized: bool,
}

impl TinyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl Backend for TinyBackend {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        tracing::debug!("tiny backend initialized");
        Ok(())
    }

    fn free(&mut self) {
        if self.initialized {
            tracing::debug!("tiny backend freed");
        }
        self.initialized = false;
    }

    fn load_model(&mut self, path: &Path, params: &ModelParams) -> Result<Box<dyn Model>> {
        if !self.initialized {
            return Err(LlamaError::Initialization(
                "backend not initialized".to_string(),
            ));
        }

        let spec = TinyModelSpec::from_file(path)?;
        let vocab = ByteVocab::new();
        let weights = if params.vocab_only {
            None
        } else {
            Some(Arc::new(TinyWeights::generate(&spec, vocab.n_tokens())))
        };

        tracing::info!(
            path = %path.display(),
            name = %spec.name,
            d_model = spec.d_model,
            vocab_only = params.vocab_only,
            "loaded tiny model"
        );

        Ok(Box::new(TinyModel {
            spec,
            vocab,
            weights,
        }))
    }
}

/// Loaded tiny model: byte vocabulary plus generated weights.
pub struct TinyModel {
    spec: TinyModelSpec,
    vocab: ByteVocab,
    weights: Option<Arc<TinyWeights>>,
}

impl TinyModel {
    pub fn spec(&self) -> &TinyModelSpec {
        &self.spec
    }
}

impl Model for TinyModel {
    fn vocab(&self) -> &dyn Vocab {
        &self.vocab
    }

    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>> {
        params.validate()?;
        let Some(weights) = &self.weights else {
            return Err(LlamaError::Initialization(
                "model was loaded vocab-only".to_string(),
            ));
        };
        if params.n_ctx > self.spec.max_ctx {
            return Err(LlamaError::Initialization(format!(
                "n_ctx {} exceeds model limit {}",
                params.n_ctx, self.spec.max_ctx
            )));
        }

        Ok(Box::new(TinyContext {
            params: params.clone(),
            weights: Arc::clone(weights),
            states: Vec::new(),
            embed_sum: vec![0.0; weights.d_model],
            logits: None,
        }))
    }

    fn description(&self) -> String {
        format!(
            "{} (d_model {}, seed {}, {} tokens)",
            self.spec.name,
            self.spec.d_model,
            self.spec.seed,
            self.vocab.n_tokens()
        )
    }
}

/// Decode context for a [`TinyModel`].
pub struct TinyContext {
    params: ContextParams,
    weights: Arc<TinyWeights>,
    // hidden state per cached position
    states: Vec<Vec<f32>>,
    embed_sum: Vec<f32>,
    logits: Option<Vec<f32>>,
}

impl TinyContext {
    /// Check a batch against the current state without touching it.
    fn check(&self, batch: &Batch) -> i32 {
        if batch.is_empty() || batch.len() > self.params.n_batch as usize {
            return DECODE_INVALID_BATCH;
        }
        let n_past = self.states.len();
        for (i, entry) in batch.entries().iter().enumerate() {
            if entry.token < 0 || entry.token as usize >= self.weights.n_vocab {
                return DECODE_INVALID_BATCH;
            }
            if entry.pos < 0 || entry.pos as usize != n_past + i {
                return DECODE_INVALID_BATCH;
            }
        }
        if n_past + batch.len() > self.params.n_ctx as usize {
            return DECODE_NO_SLOT;
        }
        0
    }

    fn step(&mut self, token: usize) -> Vec<f32> {
        let w = &self.weights;
        let embed = w.embed(token);
        for (s, &e) in self.embed_sum.iter_mut().zip(embed) {
            *s += e;
        }
        let count = (self.states.len() + 1) as f32;
        let x: Vec<f32> = embed
            .iter()
            .zip(&self.embed_sum)
            .map(|(&e, &s)| e + s / count)
            .collect();
        let h: Vec<f32> = TinyWeights::matvec(&x, &w.w_mix, w.d_model)
            .into_iter()
            .map(f32::tanh)
            .collect();
        self.states.push(h.clone());
        h
    }
}

impl Context for TinyContext {
    fn params(&self) -> &ContextParams {
        &self.params
    }

    fn clear_kv(&mut self) {
        self.states.clear();
        self.embed_sum.iter_mut().for_each(|s| *s = 0.0);
        self.logits = None;
    }

    fn n_past(&self) -> usize {
        self.states.len()
    }

    fn decode(&mut self, batch: &Batch) -> i32 {
        let code = self.check(batch);
        if code != 0 {
            return code;
        }

        let mut logits = None;
        for entry in batch.entries() {
            let h = self.step(entry.token as usize);
            if entry.logits {
                logits = Some(TinyWeights::matvec(
                    &h,
                    &self.weights.lm_head,
                    self.weights.n_vocab,
                ));
            }
        }
        self.logits = logits;
        0
    }

    fn logits(&self) -> Option<&[f32]> {
        self.logits.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llama_engine::BatchBuilder;

    fn loaded_context(n_ctx: u32, n_batch: u32) -> Box<dyn Context> {
        let spec = TinyModelSpec::default();
        let model = TinyModel {
            weights: Some(Arc::new(TinyWeights::generate(&spec, ByteVocab::SIZE))),
            spec,
            vocab: ByteVocab::new(),
        };
        model
            .new_context(&ContextParams {
                n_ctx,
                n_batch,
                n_threads: 1,
            })
            .unwrap()
    }

    #[test]
    fn rng_is_deterministic_and_small() {
        let a = WeightRng::new(7).fill(64);
        let b = WeightRng::new(7).fill(64);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 0.25));
        assert_ne!(a, WeightRng::new(8).fill(64));
    }

    #[test]
    fn zero_seed_does_not_stall() {
        let v = WeightRng::new(0).fill(4);
        assert!(v.iter().any(|&x| x != v[0]));
    }

    #[test]
    fn decode_produces_vocab_sized_logits() {
        let mut ctx = loaded_context(64, 16);
        let builder = BatchBuilder::new();
        let batch = builder.build(&[256, 104, 105], 0, 0, true).unwrap();
        assert_eq!(ctx.decode(&batch), 0);
        assert_eq!(ctx.n_past(), 3);
        assert_eq!(ctx.logits().unwrap().len(), ByteVocab::SIZE);
    }

    #[test]
    fn prefill_matches_token_by_token() {
        let builder = BatchBuilder::new();
        let tokens = [256, 10, 20, 30];

        let mut whole = loaded_context(64, 16);
        let batch = builder.build(&tokens, 0, 0, true).unwrap();
        assert_eq!(whole.decode(&batch), 0);

        let mut stepped = loaded_context(64, 16);
        for (i, &t) in tokens.iter().enumerate() {
            let batch = builder.single(t, i as i32, 0).unwrap();
            assert_eq!(stepped.decode(&batch), 0);
        }

        assert_eq!(whole.logits().unwrap(), stepped.logits().unwrap());
    }

    #[test]
    fn no_logits_unless_requested() {
        let mut ctx = loaded_context(64, 16);
        let builder = BatchBuilder::new();
        let batch = builder.build(&[1, 2], 0, 0, false).unwrap();
        assert_eq!(ctx.decode(&batch), 0);
        assert!(ctx.logits().is_none());
    }

    #[test]
    fn oversized_batch_is_rejected_without_state_change() {
        let mut ctx = loaded_context(64, 2);
        let builder = BatchBuilder::new();
        let batch = builder.build(&[1, 2, 3], 0, 0, true).unwrap();
        assert_eq!(ctx.decode(&batch), DECODE_INVALID_BATCH);
        assert_eq!(ctx.n_past(), 0);
    }

    #[test]
    fn full_window_reports_no_slot() {
        let mut ctx = loaded_context(3, 8);
        let builder = BatchBuilder::new();
        assert_eq!(ctx.decode(&builder.build(&[1, 2, 3], 0, 0, true).unwrap()), 0);
        assert_eq!(ctx.decode(&builder.single(4, 3, 0).unwrap()), DECODE_NO_SLOT);
        assert_eq!(ctx.n_past(), 3);
    }

    #[test]
    fn position_gap_is_rejected() {
        let mut ctx = loaded_context(16, 8);
        let builder = BatchBuilder::new();
        assert_eq!(
            ctx.decode(&builder.single(1, 5, 0).unwrap()),
            DECODE_INVALID_BATCH
        );
    }

    #[test]
    fn out_of_vocab_token_is_rejected() {
        let mut ctx = loaded_context(16, 8);
        let builder = BatchBuilder::new();
        assert_eq!(
            ctx.decode(&builder.single(5000, 0, 0).unwrap()),
            DECODE_INVALID_BATCH
        );
    }

    #[test]
    fn clear_kv_resets_positions() {
        let mut ctx = loaded_context(16, 8);
        let builder = BatchBuilder::new();
        assert_eq!(ctx.decode(&builder.build(&[1, 2], 0, 0, true).unwrap()), 0);
        let first = ctx.logits().unwrap().to_vec();
        ctx.clear_kv();
        assert_eq!(ctx.n_past(), 0);
        assert!(ctx.logits().is_none());
        assert_eq!(ctx.decode(&builder.build(&[1, 2], 0, 0, true).unwrap()), 0);
        assert_eq!(ctx.logits().unwrap(), first.as_slice());
    }

    #[test]
    fn spec_rejects_zero_width() {
        let spec = TinyModelSpec {
            d_model: 0,
            ..TinyModelSpec::default()
        };
        assert!(matches!(spec.validate(), Err(LlamaError::Config(_))));
    }
}
