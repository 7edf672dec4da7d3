//! # llama-bridge
//!
//! Single-session inference bridge: tokenization and greedy autoregressive
//! generation over a pluggable forward-pass backend.
//!
//! ```text
//! text ─► VocabAdapter ─► BatchBuilder ─► Context::decode ─► TokenSelector
//!                                   ▲                             │
//!                                   └──── single-token batch ◄────┤
//!                                                                 ▼
//!                                             PieceDecoder ─► TokenObserver
//! ```
//!
//! [`Session`] is the `Result`-returning API; [`Bridge`] wraps it in the
//! sentinel-returning surface a host application binds against.

pub mod bridge;
pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod stream;
pub mod template;

pub use bridge::Bridge;
pub use chat::{ChatMessage, Conversation, Role};
pub use config::BridgeConfig;
pub use engine::{Generation, InferenceEngine};
pub use error::{boundary_message, LlamaError, Result};
pub use session::Session;
pub use stream::{ChannelObserver, TokenObserver};
pub use template::Template;

pub use llama_engine::FinishReason;
