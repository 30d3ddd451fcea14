//! # process-tap-windows
//!
//! Windows WASAPI backend for process-tap.
//!
//! Provides:
//! - `WasapiBackend` — `AudioBackend` for `CaptureRegistry`
//! - `SessionEnumerator` — session lookup by pid and audio process listing
//! - `WasapiLoopbackStream` — loopback capture on one render endpoint
//! - `WasapiRenderStream` — shared-mode playback on the default endpoint
//!
//! ## Platform Requirements
//! - Windows 7+ (`IAudioSessionManager2`)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use process_tap_core::CaptureRegistry;
//! use process_tap_windows::WasapiBackend;
//!
//! let registry = CaptureRegistry::with_default_config(WasapiBackend::new())?;
//! registry.start_capture_for_process(pid);
//! ```

#[cfg(target_os = "windows")]
pub mod backend;
#[cfg(target_os = "windows")]
mod client;
#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod session_resolver;
#[cfg(target_os = "windows")]
pub mod wasapi_loopback;
#[cfg(target_os = "windows")]
pub mod wasapi_render;

#[cfg(target_os = "windows")]
pub use backend::WasapiBackend;
#[cfg(target_os = "windows")]
pub use session_resolver::SessionEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_loopback::WasapiLoopbackStream;
#[cfg(target_os = "windows")]
pub use wasapi_render::WasapiRenderStream;
