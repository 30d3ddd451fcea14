use serde::Serialize;

/// Lifecycle of a single loopback capture.
///
/// ```text
/// idle → initializing → capturing → stopping → idle
///            ↓
///           idle (initialization failed)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    #[default]
    Idle,
    Initializing,
    Capturing,
    Stopping,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }
}
