use crate::models::audio_models::ProcessInfo;
use crate::models::error::CaptureError;

/// Supplies the processes that currently own an audio session.
///
/// Returned entries carry `capturing: false`; the registry fills the flag in.
pub trait ProcessEnumerator {
    fn audio_processes(&self) -> Result<Vec<ProcessInfo>, CaptureError>;
}
