use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::audio_models::{CaptureSessionInfo, WaveFormat};
use crate::models::error::CaptureError;
use crate::models::state::CaptureState;
use crate::processing::signal::{AliveGuard, StopSignal};
use crate::traits::backend::{AudioBackend, CaptureSink, LoopbackStream};
use crate::traits::session_resolver::{MuteControl, ResolvedSession};

/// What the worker reports back once initialization succeeded.
struct StreamReady {
    device_id: String,
    format: WaveFormat,
}

#[derive(Default)]
struct CaptureCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// Loopback capture of a single process's audio session.
///
/// Owns one worker thread while capturing. Every OS object (session, mute
/// control, stream) is created, used and released on that thread. While the
/// capture runs the source session is muted so the process is only heard
/// through the render path; its previous mute flag is restored on teardown.
pub struct LoopbackCapture<B: AudioBackend> {
    pid: u32,
    backend: Arc<B>,
    poll_interval: Duration,
    state: CaptureState,
    stop_signal: Arc<StopSignal>,
    worker_alive: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    counters: Arc<CaptureCounters>,
    session_id: Uuid,
    device_id: Option<String>,
    format: Option<WaveFormat>,
    started_at: Option<DateTime<Utc>>,
}

impl<B: AudioBackend> LoopbackCapture<B> {
    pub fn new(pid: u32, backend: Arc<B>, poll_interval: Duration) -> Self {
        Self {
            pid,
            backend,
            poll_interval,
            state: CaptureState::Idle,
            stop_signal: Arc::new(StopSignal::new()),
            worker_alive: Arc::new(AtomicBool::new(false)),
            worker: None,
            counters: Arc::new(CaptureCounters::default()),
            session_id: Uuid::new_v4(),
            device_id: None,
            format: None,
            started_at: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Negotiated capture format, known once capturing.
    pub fn format(&self) -> Option<WaveFormat> {
        self.format
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Whether the worker is still polling. False after a runtime stream failure.
    pub fn is_worker_alive(&self) -> bool {
        self.worker_alive.load(Ordering::SeqCst)
    }

    /// Start capturing, delivering packets to `sink`.
    ///
    /// Blocks until the worker finished initializing. Transitions:
    /// idle → initializing → capturing, or back to idle on failure with
    /// everything acquired so far released.
    pub fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        if !self.state.is_idle() {
            return Err(CaptureError::AlreadyActive);
        }
        self.state = CaptureState::Initializing;
        self.stop_signal.reset();

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let worker = CaptureWorker {
            pid: self.pid,
            backend: Arc::clone(&self.backend),
            poll_interval: self.poll_interval,
            stop_signal: Arc::clone(&self.stop_signal),
            alive: Arc::clone(&self.worker_alive),
            counters: Arc::clone(&self.counters),
            sink,
        };
        self.worker_alive.store(true, Ordering::SeqCst);

        let handle = match thread::Builder::new()
            .name(format!("loopback-capture-{}", self.pid))
            .spawn(move || worker.run(ready_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.worker_alive.store(false, Ordering::SeqCst);
                self.state = CaptureState::Idle;
                return Err(CaptureError::ResourceExhausted(format!(
                    "failed to spawn capture thread: {}",
                    e
                )));
            }
        };

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::PlatformError(
                "capture worker exited during initialization".into(),
            ))
        });

        match ready {
            Ok(StreamReady { device_id, format }) => {
                log::info!(
                    "Capturing process {} on {} ({})",
                    self.pid,
                    device_id,
                    format
                );
                self.device_id = Some(device_id);
                self.format = Some(format);
                self.started_at = Some(Utc::now());
                self.worker = Some(handle);
                self.state = CaptureState::Capturing;
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                self.state = CaptureState::Idle;
                Err(e)
            }
        }
    }

    /// Stop capturing and wait for the worker to finish its teardown.
    ///
    /// No-op unless capturing. The join is not time-boxed.
    pub fn stop(&mut self) {
        if !self.state.is_capturing() {
            return;
        }
        self.state = CaptureState::Stopping;
        self.stop_signal.signal();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Capture worker for process {} panicked", self.pid);
            }
        }

        log::info!("Stopped capturing process {}", self.pid);
        self.format = None;
        self.device_id = None;
        self.started_at = None;
        self.state = CaptureState::Idle;
    }

    /// Snapshot for diagnostics; `None` unless capturing.
    pub fn info(&self) -> Option<CaptureSessionInfo> {
        if !self.state.is_capturing() {
            return None;
        }
        Some(CaptureSessionInfo {
            session_id: self.session_id,
            pid: self.pid,
            device_id: self.device_id.clone().unwrap_or_default(),
            format: self.format?,
            started_at: self.started_at?,
            packets: self.counters.packets.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            worker_alive: self.is_worker_alive(),
        })
    }
}

impl<B: AudioBackend> Drop for LoopbackCapture<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the capture thread owns.
struct CaptureWorker<B: AudioBackend> {
    pid: u32,
    backend: Arc<B>,
    poll_interval: Duration,
    stop_signal: Arc<StopSignal>,
    alive: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    sink: CaptureSink,
}

impl<B: AudioBackend> CaptureWorker<B> {
    fn run(self, ready: mpsc::SyncSender<Result<StreamReady, CaptureError>>) {
        let _alive = AliveGuard::new(Arc::clone(&self.alive));
        if let Err(e) = self.capture(&ready) {
            // Only initialization fails here; `start` is waiting for it
            let _ = ready.send(Err(e));
        }
    }

    fn capture(
        &self,
        ready: &mpsc::SyncSender<Result<StreamReady, CaptureError>>,
    ) -> Result<(), CaptureError> {
        let _scope = self.backend.enter_thread()?;

        let ResolvedSession { device_id, mute } = self.backend.resolve(self.pid)?;
        log::debug!("Process {} resolved to endpoint {}", self.pid, device_id);

        let mut stream = self.backend.open_loopback(&device_id)?;
        let format = stream.format();

        let muted = SourceMute::engage(self.pid, mute);
        stream.start()?;

        // The receiver outlives initialization; a send failure means `start` is gone
        let _ = ready.send(Ok(StreamReady {
            device_id,
            format,
        }));

        if let Err(e) = self.poll(stream.as_mut(), &format) {
            log::error!("Capture of process {} failed: {}", self.pid, e);
        }
        stream.stop();
        drop(muted);
        Ok(())
    }

    fn poll(&self, stream: &mut dyn LoopbackStream, format: &WaveFormat) -> Result<(), CaptureError> {
        let sink = &self.sink;
        let counters = &self.counters;
        while !self.stop_signal.wait_timeout(self.poll_interval) {
            stream.read_available(&mut |bytes: &[u8]| {
                counters.packets.fetch_add(1, Ordering::Relaxed);
                counters.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                sink(bytes, format);
            })?;
        }
        Ok(())
    }
}

/// Keeps the source session muted; restores its previous flag on drop.
struct SourceMute {
    pid: u32,
    control: Box<dyn MuteControl>,
    previous: bool,
}

impl SourceMute {
    fn engage(pid: u32, control: Box<dyn MuteControl>) -> Self {
        let previous = control.is_muted().unwrap_or(false);
        if let Err(e) = control.set_mute(true) {
            log::warn!("Failed to mute source session of process {}: {}", pid, e);
        }
        Self {
            pid,
            control,
            previous,
        }
    }
}

impl Drop for SourceMute {
    fn drop(&mut self) {
        if let Err(e) = self.control.set_mute(self.previous) {
            log::warn!(
                "Failed to restore mute on source session of process {}: {}",
                self.pid,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{wait_until, MockBackend};
    use parking_lot::Mutex;

    const POLL: Duration = Duration::from_millis(5);

    fn collecting_sink() -> (CaptureSink, Arc<Mutex<Vec<u8>>>) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink_buf = Arc::clone(&collected);
        let sink: CaptureSink = Arc::new(move |bytes: &[u8], _format: &WaveFormat| {
            sink_buf.lock().extend_from_slice(bytes);
        });
        (sink, collected)
    }

    #[test]
    fn start_mutes_source_and_stop_restores_it() {
        let backend = MockBackend::new();
        backend.add_session(1234, "player.exe", "speakers");
        let mut capture = LoopbackCapture::new(1234, Arc::new(backend.clone()), POLL);

        let (sink, _) = collecting_sink();
        capture.start(sink).unwrap();
        assert_eq!(capture.state(), CaptureState::Capturing);
        assert_eq!(backend.is_muted(1234), Some(true));
        assert_eq!(capture.device_id(), Some("speakers"));
        assert_eq!(capture.format(), Some(WaveFormat::float32_stereo(48000)));

        capture.stop();
        assert_eq!(capture.state(), CaptureState::Idle);
        assert_eq!(backend.is_muted(1234), Some(false));
        assert_eq!(backend.open_scopes(), 0);
    }

    #[test]
    fn previously_muted_session_stays_muted_after_stop() {
        let backend = MockBackend::new();
        backend.add_session(7, "muted.exe", "speakers");
        backend.set_muted(7, true);
        let mut capture = LoopbackCapture::new(7, Arc::new(backend.clone()), POLL);

        let (sink, _) = collecting_sink();
        capture.start(sink).unwrap();
        capture.stop();
        assert_eq!(backend.is_muted(7), Some(true));
    }

    #[test]
    fn packets_reach_the_sink_in_order() {
        let backend = MockBackend::new();
        backend.add_session(42, "game.exe", "headset");
        let mut capture = LoopbackCapture::new(42, Arc::new(backend.clone()), POLL);

        let (sink, collected) = collecting_sink();
        capture.start(sink).unwrap();
        backend.push_packet("headset", vec![1, 2, 3, 4]);
        backend.push_packet("headset", Vec::new());
        backend.push_packet("headset", vec![5, 6, 7, 8]);

        assert!(wait_until(Duration::from_secs(2), || collected.lock().len() == 8));
        assert_eq!(*collected.lock(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(backend.pending_packets("headset"), 0);

        let info = capture.info().unwrap();
        assert_eq!(info.pid, 42);
        assert_eq!(info.packets, 2);
        assert_eq!(info.bytes, 8);
        capture.stop();
    }

    #[test]
    fn unknown_process_fails_with_not_found() {
        let backend = MockBackend::new();
        let mut capture = LoopbackCapture::new(99, Arc::new(backend.clone()), POLL);

        let (sink, _) = collecting_sink();
        assert_eq!(capture.start(sink), Err(CaptureError::NotFound(99)));
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(!capture.is_worker_alive());
        assert_eq!(backend.open_scopes(), 0);
    }

    #[test]
    fn enumeration_failure_is_a_platform_error() {
        let backend = MockBackend::new();
        backend.add_session(5, "app.exe", "speakers");
        backend.fail_enumeration(true);
        let mut capture = LoopbackCapture::new(5, Arc::new(backend.clone()), POLL);

        let (sink, _) = collecting_sink();
        assert!(matches!(
            capture.start(sink),
            Err(CaptureError::PlatformError(_))
        ));
        assert_eq!(backend.is_muted(5), Some(false));
    }

    #[test]
    fn second_start_reports_already_active() {
        let backend = MockBackend::new();
        backend.add_session(1, "a.exe", "speakers");
        let mut capture = LoopbackCapture::new(1, Arc::new(backend), POLL);

        let (sink, _) = collecting_sink();
        capture.start(Arc::clone(&sink)).unwrap();
        assert_eq!(capture.start(sink), Err(CaptureError::AlreadyActive));
        assert_eq!(capture.state(), CaptureState::Capturing);
    }

    #[test]
    fn stop_when_idle_is_a_noop() {
        let backend = MockBackend::new();
        let mut capture = LoopbackCapture::new(1, Arc::new(backend), POLL);
        capture.stop();
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn stream_failure_ends_worker_and_unmutes() {
        let backend = MockBackend::new();
        backend.add_session(3, "app.exe", "usb");
        let mut capture = LoopbackCapture::new(3, Arc::new(backend.clone()), POLL);

        let (sink, _) = collecting_sink();
        capture.start(sink).unwrap();
        backend.fail_stream("usb");

        assert!(wait_until(Duration::from_secs(2), || !capture.is_worker_alive()));
        assert_eq!(backend.is_muted(3), Some(false));
        assert_eq!(backend.open_scopes(), 0);

        // still stoppable; joins the finished worker
        capture.stop();
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn restart_after_stop() {
        let backend = MockBackend::new();
        backend.add_session(8, "app.exe", "speakers");
        let mut capture = LoopbackCapture::new(8, Arc::new(backend.clone()), POLL);

        let (sink, collected) = collecting_sink();
        capture.start(Arc::clone(&sink)).unwrap();
        capture.stop();
        capture.start(sink).unwrap();

        backend.push_packet("speakers", vec![9; 16]);
        assert!(wait_until(Duration::from_secs(2), || collected.lock().len() == 16));
        capture.stop();
    }

    #[test]
    fn drop_stops_the_capture() {
        let backend = MockBackend::new();
        backend.add_session(11, "app.exe", "speakers");
        {
            let mut capture = LoopbackCapture::new(11, Arc::new(backend.clone()), POLL);
            let (sink, _) = collecting_sink();
            capture.start(sink).unwrap();
            assert_eq!(backend.is_muted(11), Some(true));
        }
        assert_eq!(backend.is_muted(11), Some(false));
        assert_eq!(backend.open_scopes(), 0);
    }

    #[test]
    fn stream_panic_clears_liveness_and_unmutes() {
        let backend = MockBackend::new();
        backend.add_session(12, "app.exe", "speakers");
        let mut capture = LoopbackCapture::new(12, Arc::new(backend.clone()), POLL);

        let (sink, _) = collecting_sink();
        capture.start(sink).unwrap();
        backend.panic_stream("speakers");

        assert!(wait_until(Duration::from_secs(2), || !capture.is_worker_alive()));
        assert_eq!(backend.is_muted(12), Some(false));
        assert_eq!(backend.open_scopes(), 0);

        capture.stop();
        assert_eq!(capture.state(), CaptureState::Idle);
    }
}
