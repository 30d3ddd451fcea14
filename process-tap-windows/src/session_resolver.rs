//! Audio session lookup via the MMDevice and session manager APIs.
//!
//! Walks every active render endpoint and the sessions on each one, either
//! to find the session a process plays through or to list every process
//! that currently owns a session.

use std::ops::ControlFlow;

use windows::core::*;
use windows::Win32::Foundation::{CloseHandle, S_OK};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::ProcessStatus::GetModuleBaseNameW;
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use process_tap_core::models::audio_models::ProcessInfo;
use process_tap_core::models::error::CaptureError;
use process_tap_core::traits::session_resolver::{MuteControl, ResolvedSession};

use crate::com::take_pwstr;

const UNKNOWN_PROCESS: &str = "Unknown Process";

/// Session enumerator over the active render endpoints.
pub struct SessionEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl SessionEnumerator {
    /// Requires COM to be initialized on the calling thread.
    pub fn new() -> std::result::Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|e| CaptureError::platform("CoCreateInstance(MMDeviceEnumerator)", e))?;
            Ok(Self { enumerator })
        }
    }

    /// Find the first session owned by `pid` and bind a mute switch to it.
    pub fn resolve(&self, pid: u32) -> std::result::Result<ResolvedSession, CaptureError> {
        let mut outcome = None;

        self.walk_sessions(|device, control, control2| unsafe {
            match control2.GetProcessId() {
                Ok(owner) if owner == pid => {}
                _ => return ControlFlow::Continue(()),
            }

            let device_id = match device.GetId() {
                Ok(id) => take_pwstr(id),
                Err(e) => {
                    outcome = Some(Err(CaptureError::platform("IMMDevice::GetId", e)));
                    return ControlFlow::Break(());
                }
            };

            outcome = Some(
                control
                    .cast::<ISimpleAudioVolume>()
                    .map(|volume| ResolvedSession {
                        device_id,
                        mute: Box::new(SessionMute { volume }),
                    })
                    .map_err(|e| CaptureError::platform("QueryInterface(ISimpleAudioVolume)", e)),
            );
            ControlFlow::Break(())
        })?;

        outcome.unwrap_or(Err(CaptureError::NotFound(pid)))
    }

    /// Processes owning at least one session, deduplicated by pid.
    ///
    /// The system sounds session and pid 0 are skipped.
    pub fn audio_processes(&self) -> std::result::Result<Vec<ProcessInfo>, CaptureError> {
        let mut processes: Vec<ProcessInfo> = Vec::new();

        self.walk_sessions(|_, control, control2| unsafe {
            if control2.IsSystemSoundsSession() == S_OK {
                return ControlFlow::Continue(());
            }
            let pid = match control2.GetProcessId() {
                Ok(pid) if pid != 0 => pid,
                _ => return ControlFlow::Continue(()),
            };
            if processes.iter().any(|p| p.pid == pid) {
                return ControlFlow::Continue(());
            }

            let name = control
                .GetDisplayName()
                .map(|name| take_pwstr(name))
                .ok()
                .filter(|name| !name.is_empty())
                .or_else(|| module_base_name(pid))
                .unwrap_or_else(|| UNKNOWN_PROCESS.to_string());

            processes.push(ProcessInfo {
                pid,
                name,
                capturing: false,
            });
            ControlFlow::Continue(())
        })?;

        Ok(processes)
    }

    /// Visit sessions on every active render endpoint until `visit` breaks.
    ///
    /// Endpoints first, then each endpoint's sessions, in enumeration order.
    fn walk_sessions<F>(&self, mut visit: F) -> std::result::Result<(), CaptureError>
    where
        F: FnMut(&IMMDevice, &IAudioSessionControl, &IAudioSessionControl2) -> ControlFlow<()>,
    {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::platform("EnumAudioEndpoints", e))?;
            let device_count = collection
                .GetCount()
                .map_err(|e| CaptureError::platform("IMMDeviceCollection::GetCount", e))?;

            for i in 0..device_count {
                let device = collection
                    .Item(i)
                    .map_err(|e| CaptureError::platform("IMMDeviceCollection::Item", e))?;
                let manager: IAudioSessionManager2 = device
                    .Activate(CLSCTX_ALL, None)
                    .map_err(|e| CaptureError::platform("IMMDevice::Activate(IAudioSessionManager2)", e))?;
                let sessions = manager
                    .GetSessionEnumerator()
                    .map_err(|e| CaptureError::platform("GetSessionEnumerator", e))?;
                let session_count = sessions
                    .GetCount()
                    .map_err(|e| CaptureError::platform("IAudioSessionEnumerator::GetCount", e))?;

                for j in 0..session_count {
                    let control = sessions
                        .GetSession(j)
                        .map_err(|e| CaptureError::platform("IAudioSessionEnumerator::GetSession", e))?;
                    let control2: IAudioSessionControl2 = control
                        .cast()
                        .map_err(|e| CaptureError::platform("QueryInterface(IAudioSessionControl2)", e))?;
                    if visit(&device, &control, &control2).is_break() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Mute switch over a session's `ISimpleAudioVolume`.
struct SessionMute {
    volume: ISimpleAudioVolume,
}

impl MuteControl for SessionMute {
    fn set_mute(&self, muted: bool) -> std::result::Result<(), CaptureError> {
        unsafe { self.volume.SetMute(muted, std::ptr::null()) }
            .map_err(|e| CaptureError::platform("ISimpleAudioVolume::SetMute", e))
    }

    fn is_muted(&self) -> std::result::Result<bool, CaptureError> {
        unsafe { self.volume.GetMute() }
            .map(|muted| muted.as_bool())
            .map_err(|e| CaptureError::platform("ISimpleAudioVolume::GetMute", e))
    }
}

/// Executable base name of a process, if it can be opened for query.
unsafe fn module_base_name(pid: u32) -> Option<String> {
    let process = OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid).ok()?;
    let mut buffer = [0u16; 260];
    let len = GetModuleBaseNameW(process, None, &mut buffer);
    let _ = CloseHandle(process);
    (len > 0).then(|| String::from_utf16_lossy(&buffer[..len as usize]))
}
