//! In-memory backend for exercising the engine without audio hardware.
//!
//! Sessions, packets and the render device are all simulated. The backend
//! records mute flags, thread-scope balance and every byte submitted to the
//! render device so tests can assert on observable side effects.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::audio_models::{ProcessInfo, WaveFormat};
use crate::models::error::CaptureError;
use crate::traits::backend::{AudioBackend, LoopbackStream, RenderStream, ThreadScope};
use crate::traits::process_enumerator::ProcessEnumerator;
use crate::traits::session_resolver::{MuteControl, ResolvedSession, SessionResolver};

/// Render device buffer size reported by the mock, in frames.
pub const MOCK_RENDER_BUFFER_FRAMES: u32 = 480;

struct MockSession {
    pid: u32,
    name: String,
    device_id: String,
    muted: Arc<AtomicBool>,
}

struct MockEndpoint {
    format: WaveFormat,
    packets: Arc<Mutex<VecDeque<Vec<u8>>>>,
    fail_reads: Arc<AtomicBool>,
    panic_reads: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    sessions: Mutex<Vec<MockSession>>,
    endpoints: Mutex<Vec<(String, MockEndpoint)>>,
    render_format: Mutex<Option<WaveFormat>>,
    render_fails: AtomicBool,
    rendered: Mutex<Vec<u8>>,
    render_padding: AtomicUsize,
    fail_enumeration: AtomicBool,
    scopes_entered: AtomicUsize,
    scopes_exited: Arc<AtomicUsize>,
}

/// Simulated audio backend. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend with a 48 kHz stereo float render device and no sessions.
    pub fn new() -> Self {
        let backend = Self {
            state: Arc::new(MockState::default()),
        };
        *backend.state.render_format.lock() = Some(WaveFormat::float32_stereo(48000));
        backend
    }

    /// Register an audio session for `pid` on `device_id`.
    ///
    /// The endpoint is created on first use with a 48 kHz stereo float format.
    pub fn add_session(&self, pid: u32, name: &str, device_id: &str) {
        self.ensure_endpoint(device_id, WaveFormat::float32_stereo(48000));
        self.state.sessions.lock().push(MockSession {
            pid,
            name: name.to_string(),
            device_id: device_id.to_string(),
            muted: Arc::new(AtomicBool::new(false)),
        });
    }

    pub fn add_endpoint(&self, device_id: &str, format: WaveFormat) {
        self.ensure_endpoint(device_id, format);
    }

    pub fn remove_session(&self, pid: u32) {
        self.state.sessions.lock().retain(|s| s.pid != pid);
    }

    /// Queue a packet on the endpoint that hosts `device_id`.
    pub fn push_packet(&self, device_id: &str, bytes: Vec<u8>) {
        if let Some((_, endpoint)) = self
            .state
            .endpoints
            .lock()
            .iter()
            .find(|(id, _)| id == device_id)
        {
            endpoint.packets.lock().push_back(bytes);
        }
    }

    pub fn pending_packets(&self, device_id: &str) -> usize {
        self.state
            .endpoints
            .lock()
            .iter()
            .find(|(id, _)| id == device_id)
            .map(|(_, e)| e.packets.lock().len())
            .unwrap_or(0)
    }

    /// Make every subsequent read on the endpoint fail, as if the device vanished.
    pub fn fail_stream(&self, device_id: &str) {
        if let Some((_, endpoint)) = self
            .state
            .endpoints
            .lock()
            .iter()
            .find(|(id, _)| id == device_id)
        {
            endpoint.fail_reads.store(true, Ordering::SeqCst);
        }
    }

    /// Make the next read on the endpoint panic inside the capture worker.
    pub fn panic_stream(&self, device_id: &str) {
        if let Some((_, endpoint)) = self
            .state
            .endpoints
            .lock()
            .iter()
            .find(|(id, _)| id == device_id)
        {
            endpoint.panic_reads.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_muted(&self, pid: u32) -> Option<bool> {
        self.state
            .sessions
            .lock()
            .iter()
            .find(|s| s.pid == pid)
            .map(|s| s.muted.load(Ordering::SeqCst))
    }

    pub fn set_muted(&self, pid: u32, muted: bool) {
        if let Some(session) = self.state.sessions.lock().iter().find(|s| s.pid == pid) {
            session.muted.store(muted, Ordering::SeqCst);
        }
    }

    pub fn set_render_format(&self, format: WaveFormat) {
        *self.state.render_format.lock() = Some(format);
    }

    pub fn fail_render_open(&self) {
        self.state.render_fails.store(true, Ordering::SeqCst);
    }

    /// Frames the simulated device reports as still queued.
    pub fn set_render_padding(&self, frames: u32) {
        self.state
            .render_padding
            .store(frames as usize, Ordering::SeqCst);
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Every byte submitted to the render device so far.
    pub fn rendered_bytes(&self) -> Vec<u8> {
        self.state.rendered.lock().clone()
    }

    /// Thread scopes entered but not yet released.
    pub fn open_scopes(&self) -> usize {
        self.state.scopes_entered.load(Ordering::SeqCst)
            - self.state.scopes_exited.load(Ordering::SeqCst)
    }

    fn ensure_endpoint(&self, device_id: &str, format: WaveFormat) {
        let mut endpoints = self.state.endpoints.lock();
        if !endpoints.iter().any(|(id, _)| id == device_id) {
            endpoints.push((
                device_id.to_string(),
                MockEndpoint {
                    format,
                    packets: Arc::new(Mutex::new(VecDeque::new())),
                    fail_reads: Arc::new(AtomicBool::new(false)),
                    panic_reads: Arc::new(AtomicBool::new(false)),
                },
            ));
        }
    }
}

struct MockMute(Arc<AtomicBool>);

impl MuteControl for MockMute {
    fn set_mute(&self, muted: bool) -> Result<(), CaptureError> {
        self.0.store(muted, Ordering::SeqCst);
        Ok(())
    }

    fn is_muted(&self) -> Result<bool, CaptureError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

impl SessionResolver for MockBackend {
    fn resolve(&self, pid: u32) -> Result<ResolvedSession, CaptureError> {
        if self.state.fail_enumeration.load(Ordering::SeqCst) {
            return Err(CaptureError::platform("EnumAudioEndpoints", "mock failure"));
        }
        let sessions = self.state.sessions.lock();
        let session = sessions
            .iter()
            .find(|s| s.pid == pid)
            .ok_or(CaptureError::NotFound(pid))?;
        Ok(ResolvedSession {
            device_id: session.device_id.clone(),
            mute: Box::new(MockMute(Arc::clone(&session.muted))),
        })
    }
}

struct ScopeGuard(Arc<AtomicUsize>);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl AudioBackend for MockBackend {
    fn enter_thread(&self) -> Result<ThreadScope, CaptureError> {
        self.state.scopes_entered.fetch_add(1, Ordering::SeqCst);
        Ok(ThreadScope::new(ScopeGuard(Arc::clone(
            &self.state.scopes_exited,
        ))))
    }

    fn open_loopback(&self, device_id: &str) -> Result<Box<dyn LoopbackStream>, CaptureError> {
        let endpoints = self.state.endpoints.lock();
        let (_, endpoint) = endpoints
            .iter()
            .find(|(id, _)| id == device_id)
            .ok_or_else(|| CaptureError::platform("GetDevice", device_id))?;
        Ok(Box::new(MockLoopbackStream {
            format: endpoint.format,
            packets: Arc::clone(&endpoint.packets),
            fail_reads: Arc::clone(&endpoint.fail_reads),
            panic_reads: Arc::clone(&endpoint.panic_reads),
            started: false,
        }))
    }

    fn open_default_render(&self) -> Result<Box<dyn RenderStream>, CaptureError> {
        if self.state.render_fails.load(Ordering::SeqCst) {
            return Err(CaptureError::platform("GetDefaultAudioEndpoint", "no device"));
        }
        let format = (*self.state.render_format.lock())
            .ok_or_else(|| CaptureError::platform("GetMixFormat", "no format"))?;
        Ok(Box::new(MockRenderStream {
            format,
            state: Arc::clone(&self.state),
        }))
    }
}

impl ProcessEnumerator for MockBackend {
    fn audio_processes(&self) -> Result<Vec<ProcessInfo>, CaptureError> {
        if self.state.fail_enumeration.load(Ordering::SeqCst) {
            return Err(CaptureError::platform("EnumAudioEndpoints", "mock failure"));
        }
        let mut processes: Vec<ProcessInfo> = Vec::new();
        for session in self.state.sessions.lock().iter() {
            if !processes.iter().any(|p| p.pid == session.pid) {
                processes.push(ProcessInfo {
                    pid: session.pid,
                    name: session.name.clone(),
                    capturing: false,
                });
            }
        }
        Ok(processes)
    }
}

struct MockLoopbackStream {
    format: WaveFormat,
    packets: Arc<Mutex<VecDeque<Vec<u8>>>>,
    fail_reads: Arc<AtomicBool>,
    panic_reads: Arc<AtomicBool>,
    started: bool,
}

impl LoopbackStream for MockLoopbackStream {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.started = true;
        Ok(())
    }

    fn read_available(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<(), CaptureError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CaptureError::platform("GetNextPacketSize", "device invalidated"));
        }
        if self.panic_reads.load(Ordering::SeqCst) {
            panic!("mock loopback stream panicked");
        }
        if !self.started {
            return Ok(());
        }
        loop {
            let packet = self.packets.lock().pop_front();
            match packet {
                Some(bytes) if !bytes.is_empty() => sink(&bytes),
                Some(_) => continue,
                None => return Ok(()),
            }
        }
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

struct MockRenderStream {
    format: WaveFormat,
    state: Arc<MockState>,
}

impl RenderStream for MockRenderStream {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn buffer_frames(&self) -> u32 {
        MOCK_RENDER_BUFFER_FRAMES
    }

    fn padding_frames(&mut self) -> Result<u32, CaptureError> {
        Ok(self.state.render_padding.load(Ordering::SeqCst) as u32)
    }

    fn write_frames(
        &mut self,
        frames: u32,
        fill: &mut dyn FnMut(&mut [u8]) -> u32,
    ) -> Result<(), CaptureError> {
        let mut device = vec![0u8; self.format.frames_to_bytes(frames as usize)];
        let filled = fill(&mut device).min(frames);
        let filled_bytes = self.format.frames_to_bytes(filled as usize);
        self.state
            .rendered
            .lock()
            .extend_from_slice(&device[..filled_bytes]);
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
