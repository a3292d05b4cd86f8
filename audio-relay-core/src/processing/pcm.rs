//! Sample conversion between device mix formats and relay PCM.
//!
//! Device backends deliver and expect interleaved `f32` at the endpoint's mix
//! rate; the relay moves little-endian integer PCM at the session rate.

use crate::models::geometry::AudioGeometry;

/// Downmix interleaved multi-channel audio to mono by averaging channels per frame.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let frame_count = samples.len() / channels;
    let scale = 1.0 / channels as f32;
    let mut mono = Vec::with_capacity(frame_count);
    for frame in samples.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() * scale);
    }
    mono
}

/// Duplicate mono samples into `channels` interleaved channels.
pub fn upmix_mono(mono: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * channels);
    for &sample in mono {
        out.extend(std::iter::repeat(sample).take(channels));
    }
    out
}

/// Linear interpolation resampling for interleaved audio.
///
/// Returns input unchanged if rates match.
pub fn resample(samples: &[f32], channels: usize, source_rate: f64, target_rate: f64) -> Vec<f32> {
    let channels = channels.max(1);
    if (source_rate - target_rate).abs() < 0.01 || samples.is_empty() {
        return samples.to_vec();
    }

    let frame_count = samples.len() / channels;
    let output_frames = (frame_count as f64 * target_rate / source_rate) as usize;
    if output_frames == 0 {
        return Vec::new();
    }

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 * source_rate / target_rate;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            output[i * channels + ch] = if index + 1 < frame_count {
                samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction
            } else if index < frame_count {
                samples[index * channels + ch]
            } else {
                0.0
            };
        }
    }
    output
}

/// Convert f32 samples `[-1.0, 1.0]` to little-endian integer PCM.
///
/// Clamps out-of-range values. 8-bit output is unsigned, wider depths signed.
pub fn encode(samples: &[f32], bits_per_sample: u16) -> Vec<u8> {
    let width = bits_per_sample as usize / 8;
    let mut data = Vec::with_capacity(samples.len() * width);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0) as f64;
        match bits_per_sample {
            8 => data.push((clamped * i8::MAX as f64 + 128.0) as u8),
            16 => data.extend_from_slice(&((clamped * i16::MAX as f64) as i16).to_le_bytes()),
            24 => {
                let value = (clamped * 8_388_607.0) as i32;
                data.extend_from_slice(&value.to_le_bytes()[..3]);
            }
            _ => data.extend_from_slice(&((clamped * i32::MAX as f64) as i32).to_le_bytes()),
        }
    }
    data
}

/// Convert little-endian integer PCM to f32 samples. Trailing partial samples are ignored.
pub fn decode(data: &[u8], bits_per_sample: u16) -> Vec<f32> {
    let width = (bits_per_sample as usize / 8).max(1);
    data.chunks_exact(width)
        .map(|bytes| match bits_per_sample {
            8 => (bytes[0] as f32 - 128.0) / i8::MAX as f32,
            16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32,
            24 => {
                // Sign-extend by placing the 3 bytes in the top of an i32
                let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                value as f32 / 8_388_607.0
            }
            _ => {
                (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 / i32::MAX as f64) as f32
            }
        })
        .collect()
}

/// Device mix audio (interleaved f32) → relay PCM in `geometry`'s format.
pub fn to_relay_pcm(samples: &[f32], device_rate: f64, device_channels: u16, geometry: &AudioGeometry) -> Vec<u8> {
    let device_channels = device_channels.max(1) as usize;
    let shaped = match geometry.channels {
        1 => downmix_to_mono(samples, device_channels),
        _ if device_channels == geometry.channels as usize => samples.to_vec(),
        n => upmix_mono(&downmix_to_mono(samples, device_channels), n as usize),
    };
    let resampled = resample(
        &shaped,
        geometry.channels as usize,
        device_rate,
        geometry.sample_rate as f64,
    );
    encode(&resampled, geometry.bits_per_sample)
}

/// Relay PCM → exactly `device_frames` frames of interleaved f32 at the device mix format.
///
/// The resampled block is truncated or padded with silence so the render
/// thread can hand a fixed-size buffer to the endpoint.
pub fn from_relay_pcm(
    data: &[u8],
    geometry: &AudioGeometry,
    device_rate: f64,
    device_channels: u16,
    device_frames: usize,
) -> Vec<f32> {
    let device_channels = device_channels.max(1) as usize;
    let decoded = decode(data, geometry.bits_per_sample);
    let mono = downmix_to_mono(&decoded, geometry.channels as usize);
    let resampled = resample(&mono, 1, geometry.sample_rate as f64, device_rate);
    let mut out = upmix_mono(&resampled, device_channels);
    out.resize(device_frames * device_channels, 0.0);
    out
}
