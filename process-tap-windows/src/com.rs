//! Scoped ownership of COM apartments, COM allocations and MMCSS registration.

use windows::core::{w, PWSTR};
use windows::Win32::Foundation::{HANDLE, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::WAVEFORMATEX;
use windows::Win32::System::Com::{
    CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW,
};

use process_tap_core::{CaptureError, WaveFormat};

/// Multithreaded COM apartment held for the life of a thread's audio work.
///
/// A thread already in a single-threaded apartment keeps it; the scope then
/// leaves uninitialization to whoever entered that apartment.
pub struct ComScope {
    owned: bool,
}

impl ComScope {
    pub fn enter() -> Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owned: false });
        }
        hr.ok()
            .map_err(|e| CaptureError::platform("CoInitializeEx", e))?;
        Ok(Self { owned: true })
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Copy a COM-allocated wide string and free it.
pub(crate) unsafe fn take_pwstr(value: PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = value.to_string().unwrap_or_default();
    CoTaskMemFree(Some(value.0 as *const _));
    text
}

/// Mix format returned by `IAudioClient::GetMixFormat`, freed on drop.
pub(crate) struct CoTaskFormat(*mut WAVEFORMATEX);

impl CoTaskFormat {
    /// # Safety
    /// `ptr` must come from `GetMixFormat` and not be freed elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut WAVEFORMATEX) -> Self {
        Self(ptr)
    }

    pub(crate) fn as_ptr(&self) -> *const WAVEFORMATEX {
        self.0
    }

    pub(crate) fn wave_format(&self) -> WaveFormat {
        // WAVEFORMATEX is packed
        let raw = unsafe { std::ptr::read_unaligned(self.0) };
        wave_format_from(&raw)
    }
}

impl Drop for CoTaskFormat {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
        }
    }
}

pub(crate) fn wave_format_from(raw: &WAVEFORMATEX) -> WaveFormat {
    WaveFormat {
        sample_rate: raw.nSamplesPerSec,
        channels: raw.nChannels,
        bits_per_sample: raw.wBitsPerSample,
        block_align: raw.nBlockAlign,
    }
}

/// Registers the current thread with MMCSS as "Pro Audio" until dropped.
///
/// Registration failure only costs scheduling priority, so it is not an error.
pub(crate) struct MmcssRegistration(Option<HANDLE>);

impl MmcssRegistration {
    pub(crate) fn pro_audio() -> Self {
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) } {
            Ok(handle) => Self(Some(handle)),
            Err(e) => {
                log::warn!("MMCSS registration failed: {}", e);
                Self(None)
            }
        }
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            let _ = unsafe { AvRevertMmThreadCharacteristics(handle) };
        }
    }
}
