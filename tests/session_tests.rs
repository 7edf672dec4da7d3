//! Session lifecycle: initialize, tokenize / detokenize, cleanup.

mod common;

use common::{Counters, Script, ScriptedBackend};
use llama_bridge::{BridgeConfig, LlamaError, Session};
use llama_engine::ContextParams;
use llama_tokenizer::ByteVocab;

fn session(script: Script) -> (Session<ScriptedBackend>, std::sync::Arc<Counters>) {
    let backend = ScriptedBackend::new(script);
    let counters = backend.counters();
    (Session::new(backend), counters)
}

// ===========================================================================
// Initialize
// ===========================================================================

#[test]
fn initialize_is_idempotent() {
    let (session, counters) = session(Script::default());
    assert!(!session.is_initialized());

    session.initialize("model.bin").unwrap();
    session.initialize("model.bin").unwrap();
    session.initialize("other.bin").unwrap();

    assert!(session.is_initialized());
    assert_eq!(Counters::get(&counters.loads), 1);
    assert_eq!(Counters::get(&counters.inits), 1);
}

#[test]
fn load_failure_releases_runtime() {
    let (session, counters) = session(Script {
        fail_load: true,
        ..Script::default()
    });

    let err = session.initialize("missing.bin").unwrap_err();
    assert!(matches!(err, LlamaError::Initialization(_)));
    assert!(!session.is_initialized());
    assert_eq!(Counters::get(&counters.frees), 1);
    assert_eq!(Counters::get(&counters.models_alive), 0);
}

#[test]
fn context_failure_releases_model_and_runtime() {
    let (session, counters) = session(Script {
        fail_context: true,
        ..Script::default()
    });

    let err = session.initialize("model.bin").unwrap_err();
    assert!(matches!(err, LlamaError::Initialization(_)));
    assert!(!session.is_initialized());
    assert_eq!(Counters::get(&counters.models_alive), 0);
    assert_eq!(Counters::get(&counters.contexts_alive), 0);
    assert_eq!(Counters::get(&counters.frees), 1);
}

#[test]
fn runtime_init_failure_is_initialization_error() {
    let (session, counters) = session(Script {
        fail_init: true,
        ..Script::default()
    });
    assert!(matches!(
        session.initialize("model.bin").unwrap_err(),
        LlamaError::Initialization(_)
    ));
    assert_eq!(Counters::get(&counters.loads), 0);
    assert!(!session.is_initialized());
}

#[test]
fn invalid_config_fails_initialization() {
    let config = BridgeConfig {
        context: ContextParams {
            n_ctx: 0,
            ..ContextParams::default()
        },
        ..BridgeConfig::default()
    };
    let backend = ScriptedBackend::new(Script::default());
    let counters = backend.counters();
    let session = Session::with_config(backend, config);

    let err = session.initialize("model.bin").unwrap_err();
    assert!(matches!(err, LlamaError::Initialization(_)));
    assert!(err.to_string().contains("n_ctx"));
    assert_eq!(Counters::get(&counters.loads), 0);
}

#[test]
fn retry_after_failure_succeeds() {
    let backend = ScriptedBackend::new(Script {
        fail_load: true,
        ..Script::default()
    });
    let script = backend.script();
    let session = Session::new(backend);

    assert!(session.initialize("model.bin").is_err());
    script.lock().unwrap().fail_load = false;
    session.initialize("model.bin").unwrap();
    assert!(session.is_initialized());
}

// ===========================================================================
// Cleanup
// ===========================================================================

#[test]
fn cleanup_drops_context_before_model() {
    let (session, counters) = session(Script::default());
    session.initialize("model.bin").unwrap();
    session.cleanup();

    assert!(!session.is_initialized());
    assert_eq!(*counters.drops.lock().unwrap(), vec!["context", "model"]);
    assert_eq!(Counters::get(&counters.frees), 1);
}

#[test]
fn cleanup_when_uninitialized_is_safe() {
    let (session, _counters) = session(Script::default());
    session.cleanup();
    session.cleanup();
    assert!(!session.is_initialized());
}

#[test]
fn cleanup_then_reinitialize() {
    let (session, counters) = session(Script::default());
    session.initialize("model.bin").unwrap();
    session.cleanup();
    session.initialize("model.bin").unwrap();
    assert!(session.is_initialized());
    assert_eq!(Counters::get(&counters.loads), 2);
    assert_eq!(Counters::get(&counters.models_alive), 1);
}

#[test]
fn dropping_session_releases_everything() {
    let (session, counters) = session(Script::default());
    session.initialize("model.bin").unwrap();
    drop(session);
    assert_eq!(Counters::get(&counters.models_alive), 0);
    assert_eq!(Counters::get(&counters.contexts_alive), 0);
    assert_eq!(Counters::get(&counters.frees), 1);
}

// ===========================================================================
// Tokenize / Detokenize
// ===========================================================================

#[test]
fn tokenize_requires_model() {
    let (session, _counters) = session(Script::default());
    assert!(session.tokenize("hi").unwrap_err().is_not_initialized());
    assert!(session.detokenize(65).unwrap_err().is_not_initialized());
}

#[test]
fn tokenize_after_cleanup_is_not_initialized() {
    let (session, _counters) = session(Script::default());
    session.initialize("model.bin").unwrap();
    assert!(session.tokenize("hi").is_ok());
    session.cleanup();
    assert!(matches!(
        session.tokenize("hi").unwrap_err(),
        LlamaError::NotInitialized
    ));
}

#[test]
fn tokenize_length_bounds() {
    let (session, _counters) = session(Script::default());
    session.initialize("model.bin").unwrap();

    assert_eq!(session.tokenize("").unwrap(), vec![ByteVocab::BOS]);

    let full = session.tokenize(&"y".repeat(1023)).unwrap();
    assert_eq!(full.len(), 1024);

    assert!(matches!(
        session.tokenize(&"y".repeat(1024)).unwrap_err(),
        LlamaError::Tokenization(_)
    ));
}

#[test]
fn tokenize_parses_special_text() {
    let (session, _counters) = session(Script::default());
    session.initialize("model.bin").unwrap();
    let ids = session.tokenize("a</s>").unwrap();
    assert_eq!(ids, vec![ByteVocab::BOS, b'a' as i32, ByteVocab::EOS]);
}

#[test]
fn detokenize_pieces() {
    let (session, _counters) = session(Script::default());
    session.initialize("model.bin").unwrap();

    assert_eq!(session.detokenize(b'a' as i32).unwrap(), "a");
    assert_eq!(session.detokenize(ByteVocab::EOS).unwrap(), "");
    assert!(matches!(
        session.detokenize(ByteVocab::SIZE as i32).unwrap_err(),
        LlamaError::InvalidToken(_)
    ));
    assert_eq!(session.n_vocab().unwrap(), ByteVocab::SIZE);
    assert_eq!(session.eos().unwrap(), ByteVocab::EOS);
}

#[test]
fn sessions_have_distinct_ids() {
    let (a, _) = session(Script::default());
    let (b, _) = session(Script::default());
    assert_ne!(a.id(), b.id());
}
