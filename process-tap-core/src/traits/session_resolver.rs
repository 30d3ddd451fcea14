use crate::models::error::CaptureError;

/// Mute switch bound to one process's audio session.
pub trait MuteControl {
    fn set_mute(&self, muted: bool) -> Result<(), CaptureError>;

    fn is_muted(&self) -> Result<bool, CaptureError>;
}

/// The endpoint and session that host a process's audio output.
pub struct ResolvedSession {
    /// Identifier of the render endpoint the session plays to.
    pub device_id: String,
    pub mute: Box<dyn MuteControl>,
}

impl std::fmt::Debug for ResolvedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSession")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Locates the audio session owned by a process.
///
/// Implementations enumerate every active render endpoint and each endpoint's
/// sessions in order; the first session whose owning process matches wins.
/// Returns `NotFound` when nothing matches and `PlatformError` when an
/// enumeration call fails. Must be called on a thread that has entered the
/// backend's thread scope.
pub trait SessionResolver {
    fn resolve(&self, pid: u32) -> Result<ResolvedSession, CaptureError>;
}
