use std::any::Any;
use std::sync::Arc;

use crate::models::audio_models::WaveFormat;
use crate::models::error::CaptureError;

use super::session_resolver::SessionResolver;

/// Callback invoked for every captured packet.
///
/// Parameters:
/// - raw PCM bytes of the packet, in the capture stream's own format
/// - the capture stream's negotiated format
///
/// Fires on the capture worker thread; keep processing minimal.
pub type CaptureSink = Arc<dyn Fn(&[u8], &WaveFormat) + Send + Sync + 'static>;

/// Per-thread platform setup held for the lifetime of a worker thread.
///
/// Whatever guard the backend places inside is dropped with the scope, so
/// teardown runs on every exit path of the worker.
pub struct ThreadScope {
    _guard: Option<Box<dyn Any>>,
}

impl ThreadScope {
    pub fn new<G: 'static>(guard: G) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
        }
    }

    /// A scope for backends that need no per-thread setup.
    pub fn unscoped() -> Self {
        Self { _guard: None }
    }
}

/// Loopback tap on a render endpoint.
///
/// Created and used on a single capture worker thread.
pub trait LoopbackStream {
    fn format(&self) -> WaveFormat;

    fn start(&mut self) -> Result<(), CaptureError>;

    /// Deliver every pending packet to `sink`, releasing each afterwards.
    ///
    /// Empty packets are skipped; packets flagged silent are delivered as zeros.
    fn read_available(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<(), CaptureError>;

    fn stop(&mut self);
}

/// Shared-mode stream on the default render endpoint.
///
/// Created and used on the render worker thread only.
pub trait RenderStream {
    fn format(&self) -> WaveFormat;

    fn start(&mut self) -> Result<(), CaptureError>;

    /// Total size of the device buffer in frames.
    fn buffer_frames(&self) -> u32;

    /// Frames queued on the device that have not been played yet.
    fn padding_frames(&mut self) -> Result<u32, CaptureError>;

    /// Obtain a device buffer of `frames` frames and hand it to `fill`.
    ///
    /// `fill` returns how many frames it wrote; only those are submitted.
    fn write_frames(
        &mut self,
        frames: u32,
        fill: &mut dyn FnMut(&mut [u8]) -> u32,
    ) -> Result<(), CaptureError>;

    fn stop(&mut self);
}

/// Platform implementation of the per-application audio tap.
pub trait AudioBackend: SessionResolver + Send + Sync + 'static {
    /// Prepare the calling thread for audio calls (COM apartment on Windows).
    fn enter_thread(&self) -> Result<ThreadScope, CaptureError>;

    /// Open a loopback stream on the endpoint at its native mix format.
    fn open_loopback(&self, device_id: &str) -> Result<Box<dyn LoopbackStream>, CaptureError>;

    /// Open the default render endpoint at its native mix format.
    fn open_default_render(&self) -> Result<Box<dyn RenderStream>, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(Arc<AtomicBool>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn thread_scope_runs_guard_drop() {
        let dropped = Arc::new(AtomicBool::new(false));
        let scope = ThreadScope::new(Flag(Arc::clone(&dropped)));
        assert!(!dropped.load(Ordering::SeqCst));
        drop(scope);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn unscoped_thread_scope_holds_nothing() {
        let scope = ThreadScope::unscoped();
        assert!(scope._guard.is_none());
        drop(scope);
    }
}
