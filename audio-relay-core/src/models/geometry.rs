use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::RelayError;

/// PCM frame geometry shared by every transfer in a session.
///
/// All buffer arithmetic is done in bytes; milliseconds are converted through
/// the geometry so that byte counts always land on whole sample frames.
///
/// ```text
/// frame_bytes = sample_rate * frame_ms / 1000 * channels * bits_per_sample / 8
/// 16 kHz, mono, 16-bit, 200 ms  ->  3200 samples  ->  6400 bytes
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioGeometry {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frame_ms: u32,
}

impl AudioGeometry {
    pub const DEFAULT_FRAME_MS: u32 = 200;

    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16, frame_ms: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            frame_ms,
        }
    }

    /// 16 kHz, 16-bit, mono with the default frame duration.
    pub fn pcm_s16le_16k() -> Self {
        Self::new(16000, 1, 16, Self::DEFAULT_FRAME_MS)
    }

    /// Same PCM format with a different frame duration.
    pub fn with_frame_ms(self, frame_ms: u32) -> Self {
        Self { frame_ms, ..self }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.sample_rate == 0 {
            return Err(RelayError::InvalidFormat("sample rate must be positive".into()));
        }
        if ![8, 16, 24, 32].contains(&self.bits_per_sample) {
            return Err(RelayError::InvalidFormat(format!(
                "unsupported bit depth: {}",
                self.bits_per_sample
            )));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(RelayError::InvalidFormat(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if self.frame_bytes() == 0 {
            return Err(RelayError::InvalidFormat(format!(
                "frame of {} ms holds no samples",
                self.frame_ms
            )));
        }
        Ok(())
    }

    /// Bytes per sample frame (all channels of one sampling instant).
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bits_per_sample as usize / 8
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Byte length of `ms` milliseconds, truncated to whole sample frames.
    pub fn bytes_for_ms(&self, ms: u64) -> usize {
        let samples = self.sample_rate as u64 * ms / 1000;
        samples as usize * self.block_align()
    }

    /// Duration of `bytes` in milliseconds (partial sample frames ignored).
    pub fn ms_for_bytes(&self, bytes: usize) -> u64 {
        let align = self.block_align();
        if align == 0 || self.sample_rate == 0 {
            return 0;
        }
        (bytes / align) as u64 * 1000 / self.sample_rate as u64
    }

    pub fn frame_bytes(&self) -> usize {
        self.bytes_for_ms(self.frame_ms as u64)
    }

    /// Number of whole frames needed to hold `ms` milliseconds, at least one.
    pub fn frames_for_ms(&self, ms: u64) -> usize {
        let frame_ms = self.frame_ms.max(1) as u64;
        (ms.div_ceil(frame_ms) as usize).max(1)
    }

    /// Rounds `bytes` down to a whole number of sample frames.
    pub fn align_down(&self, bytes: usize) -> usize {
        let align = self.block_align().max(1);
        bytes - bytes % align
    }

    /// True when both geometries describe the same PCM stream, ignoring frame duration.
    pub fn same_format(&self, other: &AudioGeometry) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.bits_per_sample == other.bits_per_sample
    }

    /// Parses a format string such as `pcm_s16le_16k` or `pcm_s16le_44.1k_stereo`.
    pub fn parse_format(format: &str, frame_ms: u32) -> Result<Self, RelayError> {
        let invalid = || RelayError::InvalidFormat(format.to_string());

        let mut parts = format.split('_');
        if parts.next() != Some("pcm") {
            return Err(invalid());
        }
        let bits_per_sample = match parts.next() {
            Some("u8") => 8,
            Some("s16le") => 16,
            Some("s24le") => 24,
            Some("s32le") => 32,
            _ => return Err(invalid()),
        };
        let sample_rate = parts
            .next()
            .and_then(|rate| rate.strip_suffix('k'))
            .and_then(|khz| khz.parse::<f64>().ok())
            .filter(|khz| *khz > 0.0)
            .map(|khz| (khz * 1000.0).round() as u32)
            .ok_or_else(invalid)?;
        let channels = match parts.next() {
            None | Some("mono") => 1,
            Some("stereo") => 2,
            Some(_) => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        let geometry = Self::new(sample_rate, channels, bits_per_sample, frame_ms);
        geometry.validate()?;
        Ok(geometry)
    }

    /// Format string for this geometry; inverse of [`AudioGeometry::parse_format`].
    pub fn format_name(&self) -> String {
        let sample = match self.bits_per_sample {
            8 => "u8",
            16 => "s16le",
            24 => "s24le",
            _ => "s32le",
        };
        let rate = if self.sample_rate % 1000 == 0 {
            format!("{}k", self.sample_rate / 1000)
        } else {
            format!("{}k", self.sample_rate as f64 / 1000.0)
        };
        let mut name = format!("pcm_{}_{}", sample, rate);
        if self.channels == 2 {
            name.push_str("_stereo");
        }
        name
    }
}

impl Default for AudioGeometry {
    fn default() -> Self {
        Self::pcm_s16le_16k()
    }
}

impl fmt::Display for AudioGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}ms", self.format_name(), self.frame_ms)
    }
}

impl FromStr for AudioGeometry {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_format(s, Self::DEFAULT_FRAME_MS)
    }
}
