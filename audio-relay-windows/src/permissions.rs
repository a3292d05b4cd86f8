//! Windows microphone privacy check.
//!
//! Microphone access for desktop apps is governed by Settings > Privacy >
//! Microphone. There is no consent prompt for unpackaged apps; a disabled
//! toggle only shows up as a failed activation.

use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_relay_core::RelayError;

use crate::com::{open_endpoint, start_error, ComGuard};

/// Whether the default microphone can be opened by this process.
///
/// `Ok(false)` when there is no capture endpoint or access is denied.
pub fn check_microphone_permission() -> Result<bool, RelayError> {
    let _com = ComGuard::init()?;

    let device = match open_endpoint(None, eCapture) {
        Ok(device) => device,
        Err(RelayError::DeviceNotAvailable) => return Ok(false),
        Err(e) => return Err(e),
    };

    let activated: windows::core::Result<IAudioClient> = unsafe { device.Activate(CLSCTX_ALL, None) };
    match activated {
        Ok(_) => Ok(true),
        Err(e) => match start_error(&e) {
            RelayError::PermissionDenied | RelayError::DeviceNotAvailable => Ok(false),
            other => {
                log::warn!("Unexpected error checking microphone access: {}", other);
                Ok(true)
            }
        },
    }
}
