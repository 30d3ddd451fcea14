//! WASAPI loopback stream on one render endpoint.
//!
//! Opened with `AUDCLNT_STREAMFLAGS_LOOPBACK` in shared mode at the
//! endpoint's mix format. Packets are drained with the
//! `GetNextPacketSize` / `GetBuffer` / `ReleaseBuffer` cycle.

use windows::Win32::Media::Audio::*;

use process_tap_core::models::audio_models::WaveFormat;
use process_tap_core::models::error::CaptureError;
use process_tap_core::traits::backend::LoopbackStream;

use crate::client::{Endpoint, SharedClient};
use crate::com::MmcssRegistration;

/// Loopback capture of everything played to an endpoint.
///
/// Must be created, used and dropped on the same COM-initialized thread.
pub struct WasapiLoopbackStream {
    client: SharedClient,
    capture_client: IAudioCaptureClient,
    silence: Vec<u8>,
    _mmcss: MmcssRegistration,
}

impl WasapiLoopbackStream {
    pub fn open(device_id: &str) -> Result<Self, CaptureError> {
        let client = SharedClient::open(
            Endpoint::Id(device_id),
            AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
        )?;

        let capture_client: IAudioCaptureClient = unsafe { client.audio_client.GetService() }
            .map_err(|e| CaptureError::platform("GetService(IAudioCaptureClient)", e))?;

        log::debug!("Loopback stream on {} at {}", device_id, client.format);

        Ok(Self {
            client,
            capture_client,
            silence: Vec::new(),
            _mmcss: MmcssRegistration::pro_audio(),
        })
    }
}

impl LoopbackStream for WasapiLoopbackStream {
    fn format(&self) -> WaveFormat {
        self.client.format
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.client.start()
    }

    fn read_available(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<(), CaptureError> {
        unsafe {
            let mut packet_length = self
                .capture_client
                .GetNextPacketSize()
                .map_err(|e| CaptureError::platform("GetNextPacketSize", e))?;

            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                self.capture_client
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .map_err(|e| CaptureError::platform("IAudioCaptureClient::GetBuffer", e))?;

                if num_frames > 0 && !buffer_ptr.is_null() {
                    let len = self.client.format.frames_to_bytes(num_frames as usize);
                    if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        self.silence.clear();
                        self.silence.resize(len, 0);
                        sink(&self.silence);
                    } else {
                        sink(std::slice::from_raw_parts(buffer_ptr, len));
                    }
                }

                self.capture_client
                    .ReleaseBuffer(num_frames)
                    .map_err(|e| CaptureError::platform("IAudioCaptureClient::ReleaseBuffer", e))?;

                packet_length = self
                    .capture_client
                    .GetNextPacketSize()
                    .map_err(|e| CaptureError::platform("GetNextPacketSize", e))?;
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.client.stop();
    }
}
