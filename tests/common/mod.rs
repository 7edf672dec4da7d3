//! Scripted mock backend shared by the integration tests.
//!
//! The model "wants" to emit a fixed reply: after the prompt decode it
//! favors `reply[0]`, after the k-th incremental decode it favors
//! `reply[k]`, and once the reply is exhausted it favors `fallback`.
//! Failures can be injected at every stage and counters record what the
//! session did with the backend.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llama_engine::{
    Backend, Batch, Context, ContextParams, LlamaError, Model, ModelParams, Result, TokenId, Vocab,
};
use llama_tokenizer::ByteVocab;

/// Knobs for a scripted run.
#[derive(Debug, Clone)]
pub struct Script {
    pub reply: Vec<TokenId>,
    pub fallback: TokenId,
    pub fail_init: bool,
    pub fail_load: bool,
    pub fail_context: bool,
    /// Decode call (0 = prompt) that fails, counted per request.
    pub fail_decode_at: Option<usize>,
    pub fail_code: i32,
    pub decode_delay: Option<Duration>,
    /// Tokens whose piece is [`OVERSIZED_PIECE`] bytes long.
    pub oversized: Vec<TokenId>,
}

impl Script {
    /// Reply with `text` byte by byte, then stop.
    pub fn reply(text: &str) -> Self {
        Self {
            reply: text.bytes().map(TokenId::from).collect(),
            fallback: ByteVocab::EOS,
            ..Self::default()
        }
    }

    /// Never select the stop token.
    pub fn endless(byte: u8) -> Self {
        Self {
            reply: Vec::new(),
            fallback: TokenId::from(byte),
            ..Self::default()
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Self {
            reply: Vec::new(),
            fallback: ByteVocab::EOS,
            fail_init: false,
            fail_load: false,
            fail_context: false,
            fail_decode_at: None,
            fail_code: -3,
            decode_delay: None,
            oversized: Vec::new(),
        }
    }
}

/// Length of an oversized piece, past the default piece capacity.
pub const OVERSIZED_PIECE: usize = 300;

/// What the session did with the backend.
#[derive(Debug, Default)]
pub struct Counters {
    pub inits: AtomicUsize,
    pub frees: AtomicUsize,
    pub loads: AtomicUsize,
    pub decodes: AtomicUsize,
    pub clears: AtomicUsize,
    pub models_alive: AtomicUsize,
    pub contexts_alive: AtomicUsize,
    /// Order in which models and contexts were dropped.
    pub drops: Mutex<Vec<&'static str>>,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Handle for changing the script after the backend is moved.
    pub fn script(&self) -> Arc<Mutex<Script>> {
        Arc::clone(&self.script)
    }
}

impl Backend for ScriptedBackend {
    fn init(&mut self) -> Result<()> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.script.lock().unwrap().fail_init {
            return Err(LlamaError::Initialization("runtime unavailable".into()));
        }
        Ok(())
    }

    fn free(&mut self) {
        self.counters.frees.fetch_add(1, Ordering::SeqCst);
    }

    fn load_model(&mut self, path: &Path, _params: &ModelParams) -> Result<Box<dyn Model>> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if self.script.lock().unwrap().fail_load || path.as_os_str().is_empty() {
            return Err(LlamaError::Initialization(format!(
                "cannot open {}",
                path.display()
            )));
        }
        let oversized = self.script.lock().unwrap().oversized.clone();
        self.counters.models_alive.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            vocab: ScriptedVocab { oversized },
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Byte vocabulary where some tokens render as very long pieces.
struct ScriptedVocab {
    oversized: Vec<TokenId>,
}

impl Vocab for ScriptedVocab {
    fn n_tokens(&self) -> usize {
        ByteVocab::SIZE
    }

    fn bos(&self) -> TokenId {
        ByteVocab::BOS
    }

    fn eos(&self) -> TokenId {
        ByteVocab::EOS
    }

    fn tokenize(
        &self,
        text: &str,
        tokens: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32 {
        ByteVocab.tokenize(text, tokens, add_special, parse_special)
    }

    fn token_to_piece(&self, token: TokenId, buf: &mut [u8], special: bool) -> i32 {
        if !self.oversized.contains(&token) {
            return ByteVocab.token_to_piece(token, buf, special);
        }
        if buf.len() < OVERSIZED_PIECE {
            return -(OVERSIZED_PIECE as i32);
        }
        buf[..OVERSIZED_PIECE].fill(token as u8);
        OVERSIZED_PIECE as i32
    }
}

struct ScriptedModel {
    vocab: ScriptedVocab,
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
}

impl Model for ScriptedModel {
    fn vocab(&self) -> &dyn Vocab {
        &self.vocab
    }

    fn new_context(&self, params: &ContextParams) -> Result<Box<dyn Context>> {
        if self.script.lock().unwrap().fail_context {
            return Err(LlamaError::Initialization("context allocation failed".into()));
        }
        self.counters.contexts_alive.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            params: params.clone(),
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            n_past: 0,
            calls: 0,
            logits: None,
        }))
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.counters.models_alive.fetch_sub(1, Ordering::SeqCst);
        self.counters.drops.lock().unwrap().push("model");
    }
}

struct ScriptedContext {
    params: ContextParams,
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
    n_past: usize,
    calls: usize,
    logits: Option<Vec<f32>>,
}

impl Context for ScriptedContext {
    fn params(&self) -> &ContextParams {
        &self.params
    }

    fn clear_kv(&mut self) {
        self.counters.clears.fetch_add(1, Ordering::SeqCst);
        self.n_past = 0;
        self.calls = 0;
        self.logits = None;
    }

    fn n_past(&self) -> usize {
        self.n_past
    }

    fn decode(&mut self, batch: &Batch) -> i32 {
        self.counters.decodes.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        if let Some(delay) = script.decode_delay {
            std::thread::sleep(delay);
        }

        let call = self.calls;
        self.calls += 1;
        if script.fail_decode_at == Some(call) {
            return script.fail_code;
        }
        if batch.len() > self.params.n_batch as usize {
            return -1;
        }
        if self.n_past + batch.len() > self.params.n_ctx as usize {
            return 1;
        }
        for (i, entry) in batch.entries().iter().enumerate() {
            if entry.pos as usize != self.n_past + i || entry.token as usize >= ByteVocab::SIZE {
                return -1;
            }
        }
        self.n_past += batch.len();

        let favored = script.reply.get(call).copied().unwrap_or(script.fallback);
        let mut logits = vec![0.0; ByteVocab::SIZE];
        logits[favored as usize] = 10.0;
        self.logits = Some(logits);
        0
    }

    fn logits(&self) -> Option<&[f32]> {
        self.logits.as_deref()
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.counters.contexts_alive.fetch_sub(1, Ordering::SeqCst);
        self.counters.drops.lock().unwrap().push("context");
    }
}

/// Text for a byte-token prompt.
pub fn byte_tokens(text: &str) -> Vec<TokenId> {
    let mut tokens = vec![ByteVocab::BOS];
    tokens.extend(text.bytes().map(TokenId::from));
    tokens
}
