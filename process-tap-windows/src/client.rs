//! Shared-mode `IAudioClient` setup common to loopback and render streams.

use windows::core::PCWSTR;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use process_tap_core::models::audio_models::WaveFormat;
use process_tap_core::models::error::CaptureError;

use crate::com::CoTaskFormat;

/// 100 ms in 100 ns units.
const BUFFER_DURATION: i64 = 1_000_000;

/// Render endpoint lookup.
pub(crate) enum Endpoint<'a> {
    Id(&'a str),
    DefaultRender,
}

/// An initialized shared-mode audio client at the endpoint's mix format.
pub(crate) struct SharedClient {
    pub(crate) audio_client: IAudioClient,
    pub(crate) format: WaveFormat,
    _mix_format: CoTaskFormat,
}

impl SharedClient {
    /// Requires COM to be initialized on the calling thread.
    pub(crate) fn open(endpoint: Endpoint<'_>, stream_flags: u32) -> Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|e| CaptureError::platform("CoCreateInstance(MMDeviceEnumerator)", e))?;

            let device = match endpoint {
                Endpoint::Id(id) => {
                    let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                    enumerator
                        .GetDevice(PCWSTR(wide.as_ptr()))
                        .map_err(|e| CaptureError::platform("IMMDeviceEnumerator::GetDevice", e))?
                }
                Endpoint::DefaultRender => enumerator
                    .GetDefaultAudioEndpoint(eRender, eConsole)
                    .map_err(|e| CaptureError::platform("GetDefaultAudioEndpoint", e))?,
            };

            let audio_client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| CaptureError::platform("IMMDevice::Activate(IAudioClient)", e))?;

            let mix_format = CoTaskFormat::from_raw(
                audio_client
                    .GetMixFormat()
                    .map_err(|e| CaptureError::platform("GetMixFormat", e))?,
            );

            audio_client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    stream_flags,
                    BUFFER_DURATION,
                    0,
                    mix_format.as_ptr(),
                    None,
                )
                .map_err(|e| CaptureError::platform("IAudioClient::Initialize", e))?;

            Ok(Self {
                audio_client,
                format: mix_format.wave_format(),
                _mix_format: mix_format,
            })
        }
    }

    pub(crate) fn start(&self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Start() }
            .map_err(|e| CaptureError::platform("IAudioClient::Start", e))
    }

    pub(crate) fn stop(&self) {
        if let Err(e) = unsafe { self.audio_client.Stop() } {
            log::debug!("IAudioClient::Stop failed: {}", e);
        }
    }
}
