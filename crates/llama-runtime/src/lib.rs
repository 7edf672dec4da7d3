//! # llama-runtime
//!
//! Runtime pieces that sit beside the bridge: telemetry hooks for measuring
//! generation (time to first token, tokens/sec) and [`tiny`], a deterministic
//! CPU reference backend that implements the engine traits end to end.

pub mod telemetry;
pub mod tiny;

pub use telemetry::{
    InferenceMetrics, InferenceTimer, LogTelemetry, NoopTelemetry, TelemetryHook,
    TracingTelemetry,
};
pub use tiny::{TinyBackend, TinyModelSpec};
