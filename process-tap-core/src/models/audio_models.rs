use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Negotiated PCM wave format of a capture or render stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Bytes per frame (one sample across all channels).
    pub block_align: u16,
}

impl WaveFormat {
    /// Interleaved format with block alignment derived from channels and bit depth.
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            block_align: channels * (bits_per_sample / 8),
        }
    }

    /// The shared-mode mix format most endpoints report: 48 kHz stereo float.
    pub fn float32_stereo(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2, 32)
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.block_align as usize
    }

    /// Whole frames contained in `bytes`; 0 for a degenerate format.
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        if self.block_align == 0 {
            return 0;
        }
        bytes / self.block_align as usize
    }

    /// Whether bytes produced in `self` can be rendered as `other` unchanged.
    pub fn matches(&self, other: &WaveFormat) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.bits_per_sample == other.bits_per_sample
            && self.block_align == other.block_align
    }
}

impl std::fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {} bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// A process that currently owns an audio session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub capturing: bool,
}

/// Snapshot of one active capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSessionInfo {
    pub session_id: Uuid,
    pub pid: u32,
    pub device_id: String,
    pub format: WaveFormat,
    pub started_at: DateTime<Utc>,
    pub packets: u64,
    pub bytes: u64,
    pub worker_alive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MixBufferStats {
    pub capacity: usize,
    pub buffered: usize,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub dropped_writes: u64,
    pub dropped_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub cycles: u64,
    pub frames_rendered: u64,
    pub dsp_invocations: u64,
}

/// Engine-wide diagnostics for debugging a running registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineDiagnostics {
    pub captures: Vec<CaptureSessionInfo>,
    pub render_running: bool,
    pub render_format: Option<WaveFormat>,
    pub mix: MixBufferStats,
    pub render: RenderStats,
}

impl EngineDiagnostics {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
