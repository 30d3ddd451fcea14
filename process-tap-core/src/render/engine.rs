use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::models::audio_models::{RenderStats, WaveFormat};
use crate::models::error::CaptureError;
use crate::processing::mix_buffer::MixBuffer;
use crate::processing::signal::{AliveGuard, StopSignal};
use crate::traits::backend::{AudioBackend, RenderStream};

use super::context::RenderContext;

#[derive(Default)]
struct RenderCounters {
    cycles: AtomicU64,
    frames_rendered: AtomicU64,
    dsp_invocations: AtomicU64,
}

/// Plays the mix buffer on the default render endpoint.
///
/// A single worker thread owns the device stream. Each tick it tops up the
/// free part of the device buffer from the mix buffer, runs the bound DSP
/// module over the copied region, and submits the frames it filled.
///
/// Mix buffer bytes are interpreted in the render format. Captures in another
/// format are passed through unconverted.
pub struct RenderEngine {
    stop_signal: Arc<StopSignal>,
    running: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    format: WaveFormat,
    counters: Arc<RenderCounters>,
}

impl RenderEngine {
    /// Open the default render endpoint and start the render worker.
    ///
    /// Blocks until the endpoint is open and started, or failed to.
    pub fn start<B: AudioBackend>(
        backend: Arc<B>,
        mix_buffer: Arc<MixBuffer>,
        context: Arc<RenderContext>,
        poll_interval: Duration,
    ) -> Result<Self, CaptureError> {
        let stop_signal = Arc::new(StopSignal::new());
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(RenderCounters::default());

        let worker = RenderWorker {
            backend,
            mix_buffer,
            context,
            poll_interval,
            stop_signal: Arc::clone(&stop_signal),
            running: Arc::clone(&running),
            counters: Arc::clone(&counters),
        };

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name("render-engine".into())
            .spawn(move || worker.run(ready_tx))
            .map_err(|e| {
                CaptureError::ResourceExhausted(format!("failed to spawn render thread: {}", e))
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::PlatformError(
                "render worker exited during initialization".into(),
            ))
        });

        match ready {
            Ok(format) => {
                log::info!("Render engine started ({})", format);
                Ok(Self {
                    stop_signal,
                    running,
                    worker: Some(handle),
                    format,
                    counters,
                })
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    pub fn format(&self) -> WaveFormat {
        self.format
    }

    /// False once stopped or after the device stream failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            frames_rendered: self.counters.frames_rendered.load(Ordering::Relaxed),
            dsp_invocations: self.counters.dsp_invocations.load(Ordering::Relaxed),
        }
    }

    /// Signal the worker and wait for it to release the device.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.stop_signal.signal();
        if handle.join().is_err() {
            log::error!("Render worker panicked");
        }
        log::info!("Render engine stopped");
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RenderWorker<B: AudioBackend> {
    backend: Arc<B>,
    mix_buffer: Arc<MixBuffer>,
    context: Arc<RenderContext>,
    poll_interval: Duration,
    stop_signal: Arc<StopSignal>,
    running: Arc<AtomicBool>,
    counters: Arc<RenderCounters>,
}

impl<B: AudioBackend> RenderWorker<B> {
    fn run(self, ready: mpsc::SyncSender<Result<WaveFormat, CaptureError>>) {
        let _running = AliveGuard::new(Arc::clone(&self.running));
        if let Err(e) = self.render(&ready) {
            let _ = ready.send(Err(e));
        }
    }

    fn render(
        &self,
        ready: &mpsc::SyncSender<Result<WaveFormat, CaptureError>>,
    ) -> Result<(), CaptureError> {
        let _scope = self.backend.enter_thread()?;

        let mut stream = self.backend.open_default_render()?;
        stream.start()?;
        let _ = ready.send(Ok(stream.format()));

        if let Err(e) = self.pump(stream.as_mut()) {
            log::error!("Render stream failed: {}", e);
        }
        stream.stop();
        Ok(())
    }

    fn pump(&self, stream: &mut dyn RenderStream) -> Result<(), CaptureError> {
        let format = stream.format();
        let total_frames = stream.buffer_frames();
        // Filled from the mix buffer with its lock held only for the copy
        let mut scratch = vec![0u8; format.frames_to_bytes(total_frames as usize)];

        while !self.stop_signal.wait_timeout(self.poll_interval) {
            self.counters.cycles.fetch_add(1, Ordering::Relaxed);

            let padding = stream.padding_frames()?;
            let frames_available = total_frames.saturating_sub(padding);
            let bytes_available = format.frames_to_bytes(frames_available as usize);
            if bytes_available == 0 {
                continue;
            }

            // A trailing partial frame is consumed here but never submitted
            let copied = self.mix_buffer.read_up_to(&mut scratch[..bytes_available]);
            if copied == 0 {
                continue;
            }

            let dsp = self.context.active_dsp();
            let counters = &self.counters;
            let source = &scratch[..copied];
            stream.write_frames(frames_available, &mut |device: &mut [u8]| {
                device[..copied].copy_from_slice(source);
                let frames = format.bytes_to_frames(copied);
                if let Some(dsp) = &dsp {
                    dsp.process_in_place(&mut device[..copied], frames);
                    counters.dsp_invocations.fetch_add(1, Ordering::Relaxed);
                }
                counters
                    .frames_rendered
                    .fetch_add(frames as u64, Ordering::Relaxed);
                frames as u32
            })?;
        }
        Ok(())
    }
}
