//! Single-model inference session.
//!
//! A [`Session`] owns one backend runtime, at most one loaded model with its
//! decode context, and the token selector. Every operation except
//! [`Session::is_initialized`] takes the session lock, so initialize,
//! tokenize, detokenize, generate and cleanup never overlap.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use llama_engine::{Backend, BatchBuilder, Context, LlamaError, Model, Result, TokenId};
use llama_runtime::{NoopTelemetry, TelemetryHook};
use llama_sampling::{Greedy, TokenSelector};
use llama_tokenizer::VocabAdapter;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::engine::{Generation, InferenceEngine};
use crate::stream::TokenObserver;

/// A model and the context created from it.
///
/// Field order matters: the context is dropped before the model.
struct LoadedModel {
    context: Box<dyn Context>,
    model: Box<dyn Model>,
}

struct SessionState<B> {
    backend: B,
    loaded: Option<LoadedModel>,
    selector: Box<dyn TokenSelector>,
}

/// Inference session over a [`Backend`].
pub struct Session<B: Backend> {
    id: Uuid,
    config: BridgeConfig,
    initialized: AtomicBool,
    batches: BatchBuilder,
    telemetry: Arc<dyn TelemetryHook>,
    state: Mutex<SessionState<B>>,
}

impl<B: Backend> Session<B> {
    /// Session with the default configuration and greedy selection.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, BridgeConfig::default())
    }

    pub fn with_config(backend: B, config: BridgeConfig) -> Self {
        Session {
            id: Uuid::new_v4(),
            config,
            initialized: AtomicBool::new(false),
            batches: BatchBuilder::new(),
            telemetry: Arc::new(NoopTelemetry),
            state: Mutex::new(SessionState {
                backend,
                loaded: None,
                selector: Box::new(Greedy::new()),
            }),
        }
    }

    /// Replace the token selector.
    pub fn with_selector(mut self, selector: impl TokenSelector + 'static) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .selector = Box::new(selector);
        self
    }

    /// Attach a telemetry hook that sees every generation.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of batches built by this session that are still alive.
    pub fn live_batches(&self) -> usize {
        self.batches.live()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<B>> {
        // an observer that panicked mid-generation poisons the lock; the
        // next request clears the recurrent state before using it
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the model at `path` and create its decode context.
    ///
    /// Does nothing if a model is already loaded. On failure every partially
    /// acquired resource is released, including the backend runtime.
    pub fn initialize(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _span = tracing::info_span!("session", id = %self.id).entered();
        let mut state = self.lock();

        if state.loaded.is_some() {
            tracing::debug!("model already loaded");
            return Ok(());
        }

        tracing::info!(path = %path.display(), "initializing model");
        match Self::load(&mut state.backend, path, &self.config) {
            Ok(loaded) => {
                let vocab = loaded.model.vocab();
                tracing::info!(
                    model = %loaded.model.description(),
                    n_vocab = vocab.n_tokens(),
                    eos = vocab.eos(),
                    n_ctx = self.config.context.n_ctx,
                    n_batch = self.config.context.n_batch,
                    n_threads = self.config.context.n_threads,
                    selector = state.selector.name(),
                    "model initialized"
                );
                state.loaded = Some(loaded);
                self.initialized.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                state.backend.free();
                let e = into_init_error(e);
                tracing::error!(error = %e, "initialization failed");
                Err(e)
            }
        }
    }

    fn load(backend: &mut B, path: &Path, config: &BridgeConfig) -> Result<LoadedModel> {
        config.validate()?;
        backend.init()?;
        let model = backend.load_model(path, &config.model)?;
        // on failure the model drops here, before the backend is freed
        let context = model.new_context(&config.context)?;
        Ok(LoadedModel { context, model })
    }

    /// Lock-free check whether a model is loaded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Drop the context and model, then free the backend runtime.
    ///
    /// Safe to call when nothing is loaded.
    pub fn cleanup(&self) {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        let mut state = self.lock();
        let was_loaded = state.loaded.take().is_some();
        state.backend.free();
        self.initialized.store(false, Ordering::Release);
        if was_loaded {
            tracing::info!("model released");
        }
    }

    /// Convert `text` into token ids (begin marker added, special text parsed).
    pub fn tokenize(&self, text: &str) -> Result<Vec<TokenId>> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(LlamaError::NotInitialized)?;
        self.vocab(loaded).tokenize(text)
    }

    /// Text for a single token id.
    pub fn detokenize(&self, token: TokenId) -> Result<String> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(LlamaError::NotInitialized)?;
        self.vocab(loaded).detokenize(token)
    }

    /// Vocabulary size of the loaded model.
    pub fn n_vocab(&self) -> Result<usize> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(LlamaError::NotInitialized)?;
        Ok(loaded.model.vocab().n_tokens())
    }

    /// Stop-token id of the loaded model.
    pub fn eos(&self) -> Result<TokenId> {
        let state = self.lock();
        let loaded = state.loaded.as_ref().ok_or(LlamaError::NotInitialized)?;
        Ok(loaded.model.vocab().eos())
    }

    /// Generate a continuation of `tokens`.
    ///
    /// Holds the session lock for the whole request, including every call to
    /// `observer`.
    pub fn generate(
        &self,
        tokens: &[TokenId],
        observer: Option<&mut dyn TokenObserver>,
    ) -> Result<Generation> {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        let mut state = self.lock();
        let SessionState {
            loaded, selector, ..
        } = &mut *state;
        let loaded = loaded.as_mut().ok_or(LlamaError::NotInitialized)?;

        let vocab = VocabAdapter::with_capacities(
            loaded.model.vocab(),
            self.config.token_capacity,
            self.config.piece_capacity,
        );
        let mut engine = InferenceEngine::new(
            loaded.context.as_mut(),
            vocab,
            &self.batches,
            selector.as_mut(),
            self.telemetry.as_ref(),
            self.config.max_new_tokens,
        );
        let generation = engine.generate(tokens, observer)?;

        tracing::info!(
            prompt_tokens = generation.metrics.prompt_tokens,
            generated_tokens = generation.metrics.generated_tokens,
            finish_reason = %generation.finish_reason,
            "generation complete"
        );
        Ok(generation)
    }

    fn vocab<'m>(&self, loaded: &'m LoadedModel) -> VocabAdapter<'m> {
        VocabAdapter::with_capacities(
            loaded.model.vocab(),
            self.config.token_capacity,
            self.config.piece_capacity,
        )
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.loaded.take().is_some() {
            state.backend.free();
        }
    }
}

fn into_init_error(e: LlamaError) -> LlamaError {
    match e {
        LlamaError::Initialization(_) => e,
        other => LlamaError::Initialization(other.to_string()),
    }
}
