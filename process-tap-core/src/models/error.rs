use thiserror::Error;

/// Errors that can occur while tapping, mixing or rendering process audio.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No audio session on any active render endpoint belongs to the process.
    #[error("no audio session found for process {0}")]
    NotFound(u32),

    /// An underlying OS audio subsystem call failed.
    #[error("platform audio call failed: {0}")]
    PlatformError(String),

    /// The capture is already running. Benign for callers of the registry.
    #[error("capture already active")]
    AlreadyActive,

    /// A worker thread could not be created.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CaptureError {
    /// Shorthand for wrapping a failed platform call with its name.
    pub fn platform(call: &str, detail: impl std::fmt::Display) -> Self {
        Self::PlatformError(format!("{} failed: {}", call, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_carries_call_name() {
        let err = CaptureError::platform("GetMixFormat", "0x88890008");
        assert_eq!(
            err.to_string(),
            "platform audio call failed: GetMixFormat failed: 0x88890008"
        );
    }

    #[test]
    fn not_found_names_the_process() {
        assert_eq!(
            CaptureError::NotFound(1234).to_string(),
            "no audio session found for process 1234"
        );
    }
}
