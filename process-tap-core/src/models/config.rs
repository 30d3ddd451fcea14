use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Mix buffer size used when no configuration is supplied (200 KiB).
pub const DEFAULT_MIX_BUFFER_CAPACITY: usize = 204_800;

const MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Engine configuration.
///
/// Every field has a default, so a partial JSON document is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the shared mix buffer in bytes.
    pub mix_buffer_capacity: usize,

    /// How long each capture worker waits between packet polls.
    pub capture_poll_interval_ms: u64,

    /// How long the render worker waits between device buffer refills.
    pub render_poll_interval_ms: u64,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.mix_buffer_capacity == 0 {
            return Err(CaptureError::InvalidConfiguration(
                "mix buffer capacity must be positive".into(),
            ));
        }
        for (name, value) in [
            ("capture_poll_interval_ms", self.capture_poll_interval_ms),
            ("render_poll_interval_ms", self.render_poll_interval_ms),
        ] {
            if value == 0 || value > MAX_POLL_INTERVAL_MS {
                return Err(CaptureError::InvalidConfiguration(format!(
                    "{} must be within 1..={} ms, got {}",
                    name, MAX_POLL_INTERVAL_MS, value
                )));
            }
        }
        Ok(())
    }

    pub fn capture_poll_interval(&self) -> Duration {
        Duration::from_millis(self.capture_poll_interval_ms)
    }

    pub fn render_poll_interval(&self) -> Duration {
        Duration::from_millis(self.render_poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mix_buffer_capacity: DEFAULT_MIX_BUFFER_CAPACITY,
            capture_poll_interval_ms: 50,
            render_poll_interval_ms: 20,
        }
    }
}
