//! `AudioBackend` implementation over WASAPI.

use process_tap_core::models::audio_models::ProcessInfo;
use process_tap_core::models::error::CaptureError;
use process_tap_core::traits::backend::{AudioBackend, LoopbackStream, RenderStream, ThreadScope};
use process_tap_core::traits::process_enumerator::ProcessEnumerator;
use process_tap_core::traits::session_resolver::{ResolvedSession, SessionResolver};

use crate::com::ComScope;
use crate::session_resolver::SessionEnumerator;
use crate::wasapi_loopback::WasapiLoopbackStream;
use crate::wasapi_render::WasapiRenderStream;

/// WASAPI backend for `CaptureRegistry`.
///
/// Holds no COM state itself; every stream and session handle is created on
/// the worker thread that uses it.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiBackend;

impl WasapiBackend {
    pub fn new() -> Self {
        Self
    }
}

impl SessionResolver for WasapiBackend {
    fn resolve(&self, pid: u32) -> Result<ResolvedSession, CaptureError> {
        SessionEnumerator::new()?.resolve(pid)
    }
}

impl AudioBackend for WasapiBackend {
    fn enter_thread(&self) -> Result<ThreadScope, CaptureError> {
        Ok(ThreadScope::new(ComScope::enter()?))
    }

    fn open_loopback(&self, device_id: &str) -> Result<Box<dyn LoopbackStream>, CaptureError> {
        Ok(Box::new(WasapiLoopbackStream::open(device_id)?))
    }

    fn open_default_render(&self) -> Result<Box<dyn RenderStream>, CaptureError> {
        Ok(Box::new(WasapiRenderStream::open_default()?))
    }
}

impl ProcessEnumerator for WasapiBackend {
    /// Callable from any thread; enters a COM apartment for the duration.
    fn audio_processes(&self) -> Result<Vec<ProcessInfo>, CaptureError> {
        let _com = ComScope::enter()?;
        SessionEnumerator::new()?.audio_processes()
    }
}
