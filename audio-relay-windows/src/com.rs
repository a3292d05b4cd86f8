//! COM and MMDevice plumbing shared by the recorder and player threads.

use windows::core::*;
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_relay_core::RelayError;

/// 100-nanosecond units per millisecond, as used by `IAudioClient`.
pub(crate) const REFTIMES_PER_MS: i64 = 10_000;

/// Shared-mode endpoint buffer requested from WASAPI.
pub(crate) const ENDPOINT_BUFFER_MS: i64 = 100;

/// Initializes COM (MTA) on the current thread and uninitializes it on drop.
pub(crate) struct ComGuard;

impl ComGuard {
    pub(crate) fn init() -> std::result::Result<Self, RelayError> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| RelayError::Unknown(format!("CoInitializeEx failed: {}", e)))?;
        }
        Ok(Self)
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Resolves an endpoint by ID, or the console default for `flow`.
pub(crate) fn open_endpoint(
    device_id: Option<&str>,
    flow: EDataFlow,
) -> std::result::Result<IMMDevice, RelayError> {
    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|_| RelayError::DeviceNotAvailable)?;

        match device_id {
            Some(id) => {
                let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                enumerator
                    .GetDevice(PCWSTR(wide_id.as_ptr()))
                    .map_err(|_| RelayError::DeviceNotAvailable)
            }
            None => enumerator
                .GetDefaultAudioEndpoint(flow, eConsole)
                .map_err(|_| RelayError::DeviceNotAvailable),
        }
    }
}

/// Tags the stream with an audio category. Must run before `Initialize`.
///
/// Best effort: endpoints without `IAudioClient2` keep the default category.
pub(crate) fn set_stream_category(client: &IAudioClient, category: AUDIO_STREAM_CATEGORY) {
    unsafe {
        let client2 = match client.cast::<IAudioClient2>() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("IAudioClient2 unavailable, stream category not set: {}", e);
                return;
            }
        };
        let properties = AudioClientProperties {
            cbSize: std::mem::size_of::<AudioClientProperties>() as u32,
            eCategory: category,
            ..Default::default()
        };
        if let Err(e) = client2.SetClientProperties(&properties) {
            log::warn!("SetClientProperties failed: {}", e);
        }
    }
}

/// Mix format of an activated client as `(sample_rate, channels)`.
///
/// Initializes the client in shared mode with that format and frees it.
pub(crate) fn initialize_shared(client: &IAudioClient) -> std::result::Result<(f64, u16), RelayError> {
    unsafe {
        let mix_format_ptr = client
            .GetMixFormat()
            .map_err(|e| RelayError::ConfigurationFailed(format!("GetMixFormat failed: {}", e)))?;
        let sample_rate = (*mix_format_ptr).nSamplesPerSec as f64;
        let channels = (*mix_format_ptr).nChannels;

        let result = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_NOPERSIST,
            ENDPOINT_BUFFER_MS * REFTIMES_PER_MS,
            0,
            mix_format_ptr,
            None,
        );
        CoTaskMemFree(Some(mix_format_ptr as *const _));

        result.map_err(|e| RelayError::ConfigurationFailed(format!("IAudioClient::Initialize failed: {}", e)))?;
        Ok((sample_rate, channels))
    }
}

/// Maps a start-time COM failure to the error reported to the caller.
pub(crate) fn start_error(e: &Error) -> RelayError {
    let code = e.code();
    if code == E_ACCESSDENIED {
        RelayError::PermissionDenied
    } else if code == AUDCLNT_E_DEVICE_INVALIDATED || code == AUDCLNT_E_DEVICE_IN_USE {
        RelayError::DeviceNotAvailable
    } else {
        RelayError::Stream(e.to_string())
    }
}
