//! WASAPI shared-mode render stream on the default output endpoint.

use process_tap_core::models::audio_models::WaveFormat;
use process_tap_core::models::error::CaptureError;
use process_tap_core::traits::backend::RenderStream;
use windows::Win32::Media::Audio::*;

use crate::client::{Endpoint, SharedClient};
use crate::com::MmcssRegistration;

/// Default-endpoint playback through `IAudioRenderClient`.
///
/// Must be created, used and dropped on the same COM-initialized thread.
pub struct WasapiRenderStream {
    client: SharedClient,
    render_client: IAudioRenderClient,
    buffer_frames: u32,
    _mmcss: MmcssRegistration,
}

impl WasapiRenderStream {
    pub fn open_default() -> Result<Self, CaptureError> {
        let client = SharedClient::open(Endpoint::DefaultRender, 0)?;

        let buffer_frames = unsafe { client.audio_client.GetBufferSize() }
            .map_err(|e| CaptureError::platform("IAudioClient::GetBufferSize", e))?;

        let render_client: IAudioRenderClient = unsafe { client.audio_client.GetService() }
            .map_err(|e| CaptureError::platform("GetService(IAudioRenderClient)", e))?;

        log::debug!(
            "Render stream at {}, {} frame buffer",
            client.format,
            buffer_frames
        );

        Ok(Self {
            client,
            render_client,
            buffer_frames,
            _mmcss: MmcssRegistration::pro_audio(),
        })
    }
}

impl RenderStream for WasapiRenderStream {
    fn format(&self) -> WaveFormat {
        self.client.format
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.client.start()
    }

    fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    fn padding_frames(&mut self) -> Result<u32, CaptureError> {
        unsafe { self.client.audio_client.GetCurrentPadding() }
            .map_err(|e| CaptureError::platform("GetCurrentPadding", e))
    }

    fn write_frames(
        &mut self,
        frames: u32,
        fill: &mut dyn FnMut(&mut [u8]) -> u32,
    ) -> Result<(), CaptureError> {
        unsafe {
            let data = self
                .render_client
                .GetBuffer(frames)
                .map_err(|e| CaptureError::platform("IAudioRenderClient::GetBuffer", e))?;

            let len = self.client.format.frames_to_bytes(frames as usize);
            let written = if data.is_null() || len == 0 {
                0
            } else {
                fill(std::slice::from_raw_parts_mut(data, len)).min(frames)
            };

            self.render_client
                .ReleaseBuffer(written, 0)
                .map_err(|e| CaptureError::platform("IAudioRenderClient::ReleaseBuffer", e))
        }
    }

    fn stop(&mut self) {
        self.client.stop();
    }
}
