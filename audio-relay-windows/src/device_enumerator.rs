//! Audio endpoint enumeration via the MMDevice API.
//!
//! Lists active capture and render endpoints with friendly names and
//! transport types so a recorder or player can be bound to one of them.

use windows::core::*;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_relay_core::{AudioDevice, DeviceKind, RelayError, TransportType};

use crate::com::ComGuard;

fn data_flow(kind: DeviceKind) -> EDataFlow {
    match kind {
        DeviceKind::Capture => eCapture,
        DeviceKind::Render => eRender,
    }
}

/// Endpoint enumerator. Requires COM to be initialized on the calling thread.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> std::result::Result<Self, RelayError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| RelayError::Unknown(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// Console default endpoint for `kind`, resolved on a COM-initialized scope.
    pub fn default_device(kind: DeviceKind) -> std::result::Result<AudioDevice, RelayError> {
        let _com = ComGuard::init()?;
        Self::new()?.default_endpoint(kind)
    }

    /// Active endpoints of `kind`, the default flagged.
    pub fn list(kind: DeviceKind) -> std::result::Result<Vec<AudioDevice>, RelayError> {
        let _com = ComGuard::init()?;
        Self::new()?.list_devices(kind)
    }

    pub fn default_endpoint(&self, kind: DeviceKind) -> std::result::Result<AudioDevice, RelayError> {
        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow(kind), eConsole)
                .map_err(|_| RelayError::DeviceNotAvailable)?;
            let id = device_id(&device).ok_or(RelayError::DeviceNotAvailable)?;
            Ok(describe(&device, id, kind, true))
        }
    }

    pub fn list_devices(&self, kind: DeviceKind) -> std::result::Result<Vec<AudioDevice>, RelayError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow(kind), DEVICE_STATE_ACTIVE)
                .map_err(|e| RelayError::Unknown(format!("EnumAudioEndpoints failed: {}", e)))?;
            let count = collection
                .GetCount()
                .map_err(|e| RelayError::Unknown(format!("GetCount failed: {}", e)))?;

            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow(kind), eConsole)
                .ok()
                .and_then(|d| device_id(&d));

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let Ok(device) = collection.Item(i) else {
                    continue;
                };
                let Some(id) = device_id(&device) else {
                    continue;
                };
                let is_default = default_id.as_deref() == Some(id.as_str());
                devices.push(describe(&device, id, kind, is_default));
            }
            log::debug!("{} active {:?} endpoints", devices.len(), kind);
            Ok(devices)
        }
    }
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let id = device.GetId().ok()?;
        let text = id.to_string().ok();
        CoTaskMemFree(Some(id.0 as *const _));
        text
    }
}

fn describe(device: &IMMDevice, id: String, kind: DeviceKind, is_default: bool) -> AudioDevice {
    let store = unsafe { device.OpenPropertyStore(STGM_READ) }.ok();
    let name = store
        .as_ref()
        .and_then(|s| unsafe { s.GetValue(&PKEY_Device_FriendlyName) }.ok())
        .and_then(string_property)
        .unwrap_or_else(|| id.clone());
    let transport_type = store
        .as_ref()
        .and_then(|s| unsafe { s.GetValue(&PKEY_Device_EnumeratorName) }.ok())
        .and_then(string_property)
        .map(|enumerator| transport_from_enumerator(&enumerator));

    AudioDevice {
        id,
        name,
        kind,
        is_default,
        transport_type,
    }
}

fn string_property(value: PROPVARIANT) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    BSTR::try_from(&value).ok().map(|text| text.to_string())
}

/// Bus enumerator name (`PKEY_Device_EnumeratorName`) → transport.
fn transport_from_enumerator(enumerator: &str) -> TransportType {
    let upper = enumerator.to_ascii_uppercase();
    if upper.contains("BTHLEENUM") {
        TransportType::BluetoothLE
    } else if upper.contains("BTHENUM") {
        TransportType::Bluetooth
    } else if upper.contains("USB") {
        TransportType::Usb
    } else if upper.contains("SWD") || upper.contains("ROOT") {
        TransportType::Virtual
    } else if upper.contains("HDAUDIO") || upper.contains("INTELAUDIO") {
        TransportType::BuiltIn
    } else {
        TransportType::Unknown
    }
}
