//! # process-tap-core
//!
//! Platform-agnostic per-process audio tap engine.
//!
//! Captures the audio of individual processes through loopback streams,
//! appends it to one shared mix buffer, and plays that buffer on the default
//! output through an optional DSP module, while muting each source session so
//! the process is only heard once. Platform backends (Windows WASAPI)
//! implement the `AudioBackend` trait and plug into `CaptureRegistry`.
//!
//! ## Architecture
//!
//! ```text
//! process-tap-core (this crate)
//! ├── traits/       ← AudioBackend, SessionResolver, LoopbackStream, RenderStream, DspProcessor
//! ├── models/       ← CaptureError, CaptureState, EngineConfig, WaveFormat, diagnostics
//! ├── processing/   ← MixBuffer, StopSignal
//! ├── capture/      ← LoopbackCapture (one worker thread per process)
//! ├── render/       ← RenderEngine (single render worker), RenderContext
//! ├── session/      ← CaptureRegistry (public façade)
//! └── mock          ← in-memory backend (tests, `mock` feature)
//! ```

pub mod capture;
pub mod models;
pub mod processing;
pub mod render;
pub mod session;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export key types at crate root for convenience.
pub use capture::loopback::LoopbackCapture;
pub use models::audio_models::{
    CaptureSessionInfo, EngineDiagnostics, MixBufferStats, ProcessInfo, RenderStats, WaveFormat,
};
pub use models::config::EngineConfig;
pub use models::error::CaptureError;
pub use models::state::CaptureState;
pub use processing::mix_buffer::MixBuffer;
pub use processing::signal::StopSignal;
pub use render::context::RenderContext;
pub use render::engine::RenderEngine;
pub use session::registry::CaptureRegistry;
pub use traits::backend::{AudioBackend, CaptureSink, LoopbackStream, RenderStream, ThreadScope};
pub use traits::dsp::DspProcessor;
pub use traits::process_enumerator::ProcessEnumerator;
pub use traits::session_resolver::{MuteControl, ResolvedSession, SessionResolver};
