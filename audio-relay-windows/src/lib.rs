//! # audio-relay-windows
//!
//! Windows WASAPI backend for audio-relay.
//!
//! Provides:
//! - `WasapiRecorder`: shared-mode capture, staged through a `StagedSource`
//! - `WasapiPlayer`: shared-mode render, fed from a `StagedSink`
//! - `DeviceEnumerator`: endpoint enumeration via the MMDevice API
//! - `permissions`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1703+ for `IAudioClient2` stream categories
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use audio_relay_core::{AudioGeometry, RelayConfig, RelayController};
//! use audio_relay_windows::{WasapiPlayer, WasapiRecorder};
//!
//! let config = RelayConfig::default();
//! let geometry = AudioGeometry::pcm_s16le_16k();
//! let recorder = WasapiRecorder::default_device(geometry, config.recorder_buffer_ms)?;
//! let player = WasapiPlayer::default_device(geometry, config.player_buffer_ms)?;
//! let mut relay = RelayController::new(recorder, player, config)?;
//! relay.start_playback();
//! relay.start_capture();
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_player;
#[cfg(target_os = "windows")]
pub mod wasapi_recorder;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_player::WasapiPlayer;
#[cfg(target_os = "windows")]
pub use wasapi_recorder::{WasapiRecorder, ERR_DEVICE_FAULT};
