use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::loopback::LoopbackCapture;
use crate::models::audio_models::{EngineDiagnostics, ProcessInfo, WaveFormat};
use crate::models::config::EngineConfig;
use crate::models::error::CaptureError;
use crate::processing::mix_buffer::MixBuffer;
use crate::render::context::RenderContext;
use crate::render::engine::RenderEngine;
use crate::traits::backend::{AudioBackend, CaptureSink};
use crate::traits::dsp::DspProcessor;
use crate::traits::process_enumerator::ProcessEnumerator;

/// Public entry point: per-process capture on/off over a shared render path.
///
/// Owns the mix buffer and the render engine, both created with the registry,
/// and at most one loopback capture per process id. Data flow:
/// ```text
/// [LoopbackCapture pid A] ─┐
/// [LoopbackCapture pid B] ─┼→ [MixBuffer] → [RenderEngine] → [DSP] → default output
/// [LoopbackCapture pid C] ─┘
/// ```
/// Captures append whole packets to the mix buffer in lock order; streams are
/// interleaved, not summed.
pub struct CaptureRegistry<B: AudioBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    captures: Mutex<HashMap<u32, LoopbackCapture<B>>>,
    mix_buffer: Arc<MixBuffer>,
    context: Arc<RenderContext>,
    render: Mutex<Option<RenderEngine>>,
}

impl<B: AudioBackend> CaptureRegistry<B> {
    /// Validate `config`, allocate the mix buffer and start the render engine.
    ///
    /// A render engine that fails to start is logged and left absent; captures
    /// still run but nothing drains the mix buffer.
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let backend = Arc::new(backend);
        let mix_buffer = Arc::new(MixBuffer::new(config.mix_buffer_capacity));
        let context = Arc::new(RenderContext::new());

        let render = match RenderEngine::start(
            Arc::clone(&backend),
            Arc::clone(&mix_buffer),
            Arc::clone(&context),
            config.render_poll_interval(),
        ) {
            Ok(engine) => Some(engine),
            Err(e) => {
                log::error!("Render engine unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            backend,
            config,
            captures: Mutex::new(HashMap::new()),
            mix_buffer,
            context,
            render: Mutex::new(render),
        })
    }

    pub fn with_default_config(backend: B) -> Result<Self, CaptureError> {
        Self::new(backend, EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start capturing `pid`. Idempotent and silent.
    ///
    /// Failures are logged only; poll `is_process_capturing` to confirm.
    pub fn start_capture_for_process(&self, pid: u32) {
        if let Err(e) = self.try_start_capture_for_process(pid) {
            log::error!("Could not start capture for process {}: {}", pid, e);
        }
    }

    /// Start capturing `pid`, reporting why it failed.
    ///
    /// Already capturing is `Ok`. An entry whose worker died on a stream
    /// failure is replaced by a fresh capture.
    pub fn try_start_capture_for_process(&self, pid: u32) -> Result<(), CaptureError> {
        let mut captures = self.captures.lock();

        if let Some(existing) = captures.get(&pid) {
            if existing.is_worker_alive() {
                return Ok(());
            }
            log::info!("Reaping finished capture for process {}", pid);
            if let Some(mut dead) = captures.remove(&pid) {
                dead.stop();
            }
        }

        let mut capture = LoopbackCapture::new(
            pid,
            Arc::clone(&self.backend),
            self.config.capture_poll_interval(),
        );
        capture.start(self.mix_sink())?;

        if let (Some(capture_format), Some(render_format)) = (capture.format(), self.render_format()) {
            if !capture_format.matches(&render_format) {
                log::warn!(
                    "Process {} captures at {} but output renders at {}; audio is passed through unconverted",
                    pid,
                    capture_format,
                    render_format
                );
            }
        }

        captures.insert(pid, capture);
        Ok(())
    }

    /// Stop capturing `pid`. No-op when it is not being captured.
    pub fn stop_capture_for_process(&self, pid: u32) {
        let mut captures = self.captures.lock();
        if let Some(mut capture) = captures.remove(&pid) {
            capture.stop();
        }
    }

    pub fn is_process_capturing(&self, pid: u32) -> bool {
        self.captures.lock().contains_key(&pid)
    }

    /// Start or stop `pid` to match a UI toggle.
    pub fn set_process_capture_state(&self, pid: u32, capture: bool) {
        if capture {
            self.start_capture_for_process(pid);
        } else {
            self.stop_capture_for_process(pid);
        }
    }

    /// Bind the DSP module used by subsequent render cycles.
    pub fn set_dsp_capability(&self, dsp: Arc<dyn DspProcessor>) {
        self.context.set_dsp(dsp);
    }

    pub fn clear_dsp_capability(&self) {
        self.context.clear_dsp();
    }

    /// Process ids with a registered capture, in ascending order.
    pub fn active_processes(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.captures.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Remove captures whose worker ended on a stream failure.
    ///
    /// Returns the reaped process ids.
    pub fn reap_finished(&self) -> Vec<u32> {
        let mut captures = self.captures.lock();
        let dead: Vec<u32> = captures
            .iter()
            .filter(|(_, capture)| !capture.is_worker_alive())
            .map(|(&pid, _)| pid)
            .collect();
        for pid in &dead {
            if let Some(mut capture) = captures.remove(pid) {
                capture.stop();
            }
        }
        dead
    }

    /// The enumerator's audio processes, flagged with their capture state.
    pub fn audio_processes(
        &self,
        enumerator: &dyn ProcessEnumerator,
    ) -> Result<Vec<ProcessInfo>, CaptureError> {
        let mut processes = enumerator.audio_processes()?;
        let captures = self.captures.lock();
        for process in &mut processes {
            process.capturing = captures.contains_key(&process.pid);
        }
        Ok(processes)
    }

    pub fn render_format(&self) -> Option<WaveFormat> {
        self.render.lock().as_ref().map(|engine| engine.format())
    }

    pub fn is_render_running(&self) -> bool {
        self.render
            .lock()
            .as_ref()
            .map(|engine| engine.is_running())
            .unwrap_or(false)
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        let mut captures: Vec<_> = self
            .captures
            .lock()
            .values()
            .filter_map(|capture| capture.info())
            .collect();
        captures.sort_by_key(|info| info.pid);

        let render = self.render.lock();
        EngineDiagnostics {
            captures,
            render_running: render.as_ref().map(|e| e.is_running()).unwrap_or(false),
            render_format: render.as_ref().map(|e| e.format()),
            mix: self.mix_buffer.stats(),
            render: render.as_ref().map(|e| e.stats()).unwrap_or_default(),
        }
    }

    /// Stop the render engine, then every remaining capture. Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut engine) = self.render.lock().take() {
            engine.stop();
        }

        let drained: Vec<_> = self.captures.lock().drain().collect();
        for (_, mut capture) in drained {
            capture.stop();
        }
        self.mix_buffer.reset();
    }

    fn mix_sink(&self) -> CaptureSink {
        let mix_buffer = Arc::clone(&self.mix_buffer);
        Arc::new(move |bytes: &[u8], _format: &WaveFormat| {
            mix_buffer.write(bytes);
        })
    }
}

impl<B: AudioBackend> Drop for CaptureRegistry<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{wait_until, MockBackend};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            mix_buffer_capacity: 64 * 1024,
            capture_poll_interval_ms: 5,
            render_poll_interval_ms: 5,
        }
    }

    fn registry_with(backend: &MockBackend) -> CaptureRegistry<MockBackend> {
        CaptureRegistry::new(backend.clone(), fast_config()).unwrap()
    }

    #[test]
    fn start_makes_process_capturing_and_stop_restores_mute() {
        let backend = MockBackend::new();
        backend.add_session(1234, "player.exe", "speakers");
        let registry = registry_with(&backend);

        registry.start_capture_for_process(1234);
        // start returns once the worker is polling
        assert!(registry.is_process_capturing(1234));
        assert_eq!(backend.is_muted(1234), Some(true));

        registry.stop_capture_for_process(1234);
        assert!(!registry.is_process_capturing(1234));
        assert_eq!(backend.is_muted(1234), Some(false));
    }

    #[test]
    fn double_start_yields_one_session() {
        let backend = MockBackend::new();
        backend.add_session(10, "a.exe", "speakers");
        let registry = registry_with(&backend);

        registry.start_capture_for_process(10);
        let first = registry.diagnostics().captures[0].session_id;
        registry.start_capture_for_process(10);

        let diagnostics = registry.diagnostics();
        assert_eq!(registry.active_processes(), vec![10]);
        assert_eq!(diagnostics.captures.len(), 1);
        assert_eq!(diagnostics.captures[0].session_id, first);
    }

    #[test]
    fn stop_of_unknown_process_is_a_noop() {
        let backend = MockBackend::new();
        backend.add_session(1, "a.exe", "speakers");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(1);

        registry.stop_capture_for_process(2);
        assert_eq!(registry.active_processes(), vec![1]);
    }

    #[test]
    fn unresolvable_process_never_becomes_capturing() {
        let backend = MockBackend::new();
        let registry = registry_with(&backend);

        registry.start_capture_for_process(4242);
        thread::sleep(Duration::from_millis(20));
        assert!(!registry.is_process_capturing(4242));
        assert_eq!(
            registry.try_start_capture_for_process(4242),
            Err(CaptureError::NotFound(4242))
        );
        assert_eq!(backend.open_scopes(), 1); // render worker only
    }

    #[test]
    fn captured_audio_reaches_the_output() {
        let backend = MockBackend::new();
        backend.add_session(77, "music.exe", "speakers");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(77);

        let packet: Vec<u8> = (0..64u8).collect();
        backend.push_packet("speakers", packet.clone());

        assert!(wait_until(Duration::from_secs(2), || backend.rendered_bytes() == packet));
        let diagnostics = registry.diagnostics();
        assert_eq!(diagnostics.mix.bytes_written, 64);
        assert_eq!(diagnostics.captures[0].packets, 1);
    }

    #[test]
    fn dsp_capability_applies_to_later_cycles() {
        struct Invert {
            on: AtomicBool,
        }
        impl DspProcessor for Invert {
            fn process_in_place(&self, buffer: &mut [u8], _sample_count: usize) {
                for b in buffer.iter_mut() {
                    *b = !*b;
                }
            }
            fn is_powered_on(&self) -> bool {
                self.on.load(Ordering::SeqCst)
            }
        }

        let backend = MockBackend::new();
        backend.add_session(5, "a.exe", "speakers");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(5);
        registry.set_dsp_capability(Arc::new(Invert {
            on: AtomicBool::new(true),
        }));

        backend.push_packet("speakers", vec![0x0F; 8]);
        assert!(wait_until(Duration::from_secs(2), || backend.rendered_bytes().len() == 8));
        assert_eq!(backend.rendered_bytes(), vec![0xF0; 8]);

        registry.clear_dsp_capability();
        backend.push_packet("speakers", vec![0x0F; 8]);
        assert!(wait_until(Duration::from_secs(2), || backend.rendered_bytes().len() == 16));
        assert_eq!(&backend.rendered_bytes()[8..], &[0x0F; 8]);
    }

    #[test]
    fn concurrent_start_stop_keeps_map_consistent() {
        let backend = MockBackend::new();
        for pid in 1..=8 {
            backend.add_session(pid, &format!("app{}.exe", pid), "speakers");
        }
        let registry = Arc::new(registry_with(&backend));

        // odd pids end started, even pids end stopped
        let handles: Vec<_> = (1..=8u32)
            .map(|pid| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..5 {
                        registry.start_capture_for_process(pid);
                        registry.stop_capture_for_process(pid);
                    }
                    if pid % 2 == 1 {
                        registry.start_capture_for_process(pid);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.active_processes(), vec![1, 3, 5, 7]);
        for pid in 1..=8 {
            assert_eq!(backend.is_muted(pid), Some(pid % 2 == 1));
        }
    }

    #[test]
    fn dead_capture_is_reaped_on_restart() {
        let backend = MockBackend::new();
        backend.add_session(3, "a.exe", "usb");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(3);
        let first = registry.diagnostics().captures[0].session_id;

        backend.fail_stream("usb");
        assert!(wait_until(Duration::from_secs(2), || {
            !registry.diagnostics().captures[0].worker_alive
        }));
        // membership survives a runtime failure until the caller acts
        assert!(registry.is_process_capturing(3));

        backend.add_endpoint("usb-2", WaveFormat::float32_stereo(48000));
        backend.remove_session(3);
        backend.add_session(3, "a.exe", "usb-2");
        registry.start_capture_for_process(3);

        let captures = registry.diagnostics().captures;
        assert_eq!(captures.len(), 1);
        assert_ne!(captures[0].session_id, first);
        assert_eq!(captures[0].device_id, "usb-2");
        assert!(captures[0].worker_alive);
    }

    #[test]
    fn reap_finished_removes_only_dead_captures() {
        let backend = MockBackend::new();
        backend.add_session(1, "a.exe", "usb");
        backend.add_session(2, "b.exe", "speakers");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(1);
        registry.start_capture_for_process(2);

        backend.fail_stream("usb");
        assert!(wait_until(Duration::from_secs(2), || {
            registry
                .diagnostics()
                .captures
                .iter()
                .any(|c| c.pid == 1 && !c.worker_alive)
        }));

        assert_eq!(registry.reap_finished(), vec![1]);
        assert_eq!(registry.active_processes(), vec![2]);
    }

    #[test]
    fn audio_processes_flags_captured_entries() {
        let backend = MockBackend::new();
        backend.add_session(100, "browser.exe", "speakers");
        backend.add_session(200, "chat.exe", "speakers");
        let registry = registry_with(&backend);
        registry.set_process_capture_state(200, true);

        let processes = registry.audio_processes(&backend).unwrap();
        assert_eq!(
            processes,
            vec![
                ProcessInfo {
                    pid: 100,
                    name: "browser.exe".into(),
                    capturing: false,
                },
                ProcessInfo {
                    pid: 200,
                    name: "chat.exe".into(),
                    capturing: true,
                },
            ]
        );

        registry.set_process_capture_state(200, false);
        assert!(!registry.is_process_capturing(200));
    }

    #[test]
    fn missing_render_device_still_allows_capture() {
        let backend = MockBackend::new();
        backend.fail_render_open();
        backend.add_session(9, "a.exe", "speakers");
        let registry = registry_with(&backend);

        assert!(!registry.is_render_running());
        assert_eq!(registry.render_format(), None);
        registry.start_capture_for_process(9);
        assert!(registry.is_process_capturing(9));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            mix_buffer_capacity: 0,
            ..fast_config()
        };
        assert!(matches!(
            CaptureRegistry::new(MockBackend::new(), config),
            Err(CaptureError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn shutdown_stops_everything_and_unmutes() {
        let backend = MockBackend::new();
        backend.add_session(1, "a.exe", "speakers");
        backend.add_session(2, "b.exe", "speakers");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(1);
        registry.start_capture_for_process(2);

        drop(registry);
        assert_eq!(backend.is_muted(1), Some(false));
        assert_eq!(backend.is_muted(2), Some(false));
        assert_eq!(backend.open_scopes(), 0);
    }

    #[test]
    fn mismatched_capture_format_passes_bytes_through() {
        let backend = MockBackend::new();
        backend.set_render_format(WaveFormat::float32_stereo(48000));
        backend.add_endpoint("line-out", WaveFormat::new(44100, 2, 16));
        backend.add_session(21, "old.exe", "line-out");
        let registry = registry_with(&backend);

        registry.start_capture_for_process(21);
        assert!(registry.is_process_capturing(21));
        assert_eq!(
            registry.diagnostics().captures[0].format,
            WaveFormat::new(44100, 2, 16)
        );

        let packet: Vec<u8> = (0..64u8).collect();
        backend.push_packet("line-out", packet.clone());
        assert!(wait_until(Duration::from_secs(2), || backend.rendered_bytes() == packet));
    }

    #[test]
    fn panicked_capture_is_reaped() {
        let backend = MockBackend::new();
        backend.add_session(4, "a.exe", "speakers");
        let registry = registry_with(&backend);
        registry.start_capture_for_process(4);

        backend.panic_stream("speakers");
        assert!(wait_until(Duration::from_secs(2), || {
            !registry.diagnostics().captures[0].worker_alive
        }));
        assert_eq!(registry.reap_finished(), vec![4]);
        assert!(!registry.is_process_capturing(4));
        assert_eq!(backend.is_muted(4), Some(false));
    }
}
