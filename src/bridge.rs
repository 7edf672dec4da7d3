//! Host boundary.
//!
//! [`Bridge`] exposes a [`Session`] through the flat, sentinel-returning
//! surface a host application binds against: booleans, optional arrays,
//! empty strings and `"Error: ..."` strings instead of `Result`s.

use std::sync::Arc;

use llama_engine::{Backend, TokenId};
use llama_runtime::TelemetryHook;

use crate::config::BridgeConfig;
use crate::error::boundary_message;
use crate::session::Session;
use crate::stream::TokenObserver;

/// Sentinel-returning wrapper around a [`Session`].
pub struct Bridge<B: Backend> {
    session: Session<B>,
}

impl<B: Backend> Bridge<B> {
    pub fn new(backend: B) -> Self {
        Self::from_session(Session::new(backend))
    }

    pub fn with_config(backend: B, config: BridgeConfig) -> Self {
        Self::from_session(Session::with_config(backend, config))
    }

    pub fn from_session(session: Session<B>) -> Self {
        Bridge { session }
    }

    /// Attach a telemetry hook to the underlying session.
    pub fn with_telemetry(self, telemetry: Arc<dyn TelemetryHook>) -> Self {
        Self::from_session(self.session.with_telemetry(telemetry))
    }

    /// The wrapped session, for callers that want `Result`s.
    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    /// Load the model at `path`. Returns `true` once a model is loaded.
    pub fn init_model(&self, path: &str) -> bool {
        self.session.initialize(path).is_ok()
    }

    /// Token ids for `text`, or `None` on any failure.
    pub fn tokenize(&self, text: &str) -> Option<Vec<TokenId>> {
        match self.session.tokenize(text) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                tracing::debug!(error = %e, "tokenize failed");
                None
            }
        }
    }

    /// Text for `token`, or the empty string on any failure.
    pub fn detokenize(&self, token: TokenId) -> String {
        self.session.detokenize(token).unwrap_or_default()
    }

    /// Generate a continuation of `tokens`, streaming fragments to
    /// `observer`. Failures come back as `"Error: ..."` strings.
    pub fn generate_response(
        &self,
        tokens: &[TokenId],
        observer: Option<&mut dyn TokenObserver>,
    ) -> String {
        match self.session.generate(tokens, observer) {
            Ok(generation) => generation.text,
            Err(e) => boundary_message(&e),
        }
    }

    pub fn cleanup(&self) {
        self.session.cleanup();
    }

    /// Lock-free; never waits on a running generation.
    pub fn is_initialized(&self) -> bool {
        self.session.is_initialized()
    }
}
