use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::RelayError;
use super::geometry::AudioGeometry;
use crate::processing::relay_buffer::RelayBuffer;

/// Capture-side processing requested from the recorder.
///
/// Echo cancellation and noise suppression are capabilities of the device
/// layer; the relay only forwards the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Output stream category handed to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStream {
    #[default]
    Music,
    VoiceCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackOptions {
    pub stream: PlaybackStream,
}

/// Configuration for a relay controller and the sessions it starts.
///
/// Defaults reproduce a 2 s capture-to-speaker delay with 200 ms frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// PCM format shared by recorder and player (default: `pcm_s16le_16k`).
    pub format: String,

    /// Frame duration in milliseconds (default: 200).
    pub frame_ms: u32,

    /// Target capture-to-playback delay in milliseconds (default: 2000).
    pub target_delay_ms: u32,

    /// Extra relay capacity on top of the target delay (default: 200).
    pub slack_ms: u32,

    /// Drain margin while playback is inactive (default: 400).
    pub drain_margin_idle_ms: u32,

    /// Drain margin while playback is active (default: 200).
    pub drain_margin_playing_ms: u32,

    /// Recorder staging capacity in milliseconds (default: 2200).
    pub recorder_buffer_ms: u32,

    /// Player staging capacity in milliseconds (default: 1000).
    pub player_buffer_ms: u32,

    pub capture: CaptureOptions,

    pub playback: PlaybackOptions,

    /// Answer recorder/player error notifications with an explicit stop (default: true).
    pub stop_on_error: bool,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), String> {
        let geometry = self.geometry().map_err(|e| e.to_string())?;
        if self.target_delay_ms < self.frame_ms {
            return Err(format!(
                "target delay {} ms is shorter than one {} ms frame",
                self.target_delay_ms, self.frame_ms
            ));
        }
        if self.drain_margin_idle_ms > self.target_delay_ms
            || self.drain_margin_playing_ms > self.target_delay_ms
        {
            return Err("drain margins must not exceed the target delay".into());
        }
        let capacity_ms = self
            .target_delay_ms
            .checked_add(self.slack_ms)
            .ok_or_else(|| "relay capacity overflows".to_string())?;
        for (name, ms) in [
            ("relay capacity", capacity_ms),
            ("recorder buffer", self.recorder_buffer_ms),
            ("player buffer", self.player_buffer_ms),
        ] {
            if ms > RelayBuffer::MAX_CAPACITY_MS {
                return Err(format!(
                    "{} {} ms exceeds {} ms",
                    name,
                    ms,
                    RelayBuffer::MAX_CAPACITY_MS
                ));
            }
        }
        // Priming reads a whole target delay in one go, rounded up to frames.
        let prime_ms = geometry.frames_for_ms(self.target_delay_ms as u64) as u64 * self.frame_ms as u64;
        if prime_ms > capacity_ms as u64 {
            return Err(format!(
                "relay capacity {} ms cannot hold the {} ms priming read",
                capacity_ms, prime_ms
            ));
        }
        if self.recorder_buffer_ms < self.frame_ms || self.player_buffer_ms < self.frame_ms {
            return Err("device buffers must hold at least one frame".into());
        }
        Ok(())
    }

    /// Session geometry derived from `format` and `frame_ms`.
    pub fn geometry(&self) -> Result<AudioGeometry, RelayError> {
        AudioGeometry::parse_format(&self.format, self.frame_ms)
    }

    /// Capacity of the relay buffer: target delay plus slack, saturating.
    pub fn relay_capacity_ms(&self) -> u32 {
        self.target_delay_ms.saturating_add(self.slack_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, RelayError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RelayError::ConfigurationFailed(format!("failed to parse config: {}", e)))?;
        config.validate().map_err(RelayError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let json = fs::read_to_string(path).map_err(|e| {
            RelayError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            format: "pcm_s16le_16k".into(),
            frame_ms: 200,
            target_delay_ms: 2000,
            slack_ms: 200,
            drain_margin_idle_ms: 400,
            drain_margin_playing_ms: 200,
            recorder_buffer_ms: 2200,
            player_buffer_ms: 1000,
            capture: CaptureOptions::default(),
            playback: PlaybackOptions::default(),
            stop_on_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = RelayConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.relay_capacity_ms(), 2200);
        assert_eq!(config.geometry().unwrap().frame_bytes(), 6400);
    }

    #[test]
    fn rejects_capacity_smaller_than_prime() {
        let config = RelayConfig {
            target_delay_ms: 2100,
            slack_ms: 0,
            ..RelayConfig::default()
        };
        // 2100 ms rounds up to 11 frames = 2200 ms
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_margins() {
        let config = RelayConfig {
            drain_margin_idle_ms: 5000,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = RelayConfig::from_json_str(r#"{ "target_delay_ms": 1000, "playback": { "stream": "voice_call" } }"#)
            .unwrap();
        assert_eq!(config.target_delay_ms, 1000);
        assert_eq!(config.frame_ms, 200);
        assert_eq!(config.playback.stream, PlaybackStream::VoiceCall);
        assert!(config.capture.echo_cancellation);
    }

    #[test]
    fn overflowing_capacity_is_configuration_error() {
        let err = RelayConfig::from_json_str(r#"{ "target_delay_ms": 4294967295, "slack_ms": 1 }"#).unwrap_err();
        assert!(matches!(err, RelayError::ConfigurationFailed(_)));
        let config = RelayConfig {
            target_delay_ms: u32::MAX,
            slack_ms: 1,
            ..RelayConfig::default()
        };
        assert_eq!(config.relay_capacity_ms(), u32::MAX);
    }

    #[test]
    fn rejects_capacity_above_buffer_limit() {
        let config = RelayConfig {
            target_delay_ms: 60_000,
            slack_ms: 200,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            player_buffer_ms: RelayBuffer::MAX_CAPACITY_MS + 1,
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_json_is_configuration_error() {
        let err = RelayConfig::from_json_str(r#"{ "format": "mp3" }"#).unwrap_err();
        assert!(matches!(err, RelayError::ConfigurationFailed(_)));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = RelayConfig::load(Path::new("/nonexistent/relay.json")).unwrap_err();
        assert!(matches!(err, RelayError::ConfigurationFailed(_)));
    }
}
