use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::{RelayError, Side};
use crate::models::geometry::AudioGeometry;
use crate::processing::relay_buffer::{ReadOutcome, RelayBuffer};
use crate::traits::playback_sink::PlaybackSink;

/// What a render pass got from [`StagedSink::pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkPull {
    /// Bytes of real audio at the front of the output; the rest is silence.
    Data(usize),
    /// A write session is open but nothing is queued.
    Starved,
    /// The writer ended and its backlog has been played. Reported once per session.
    Ended { cancelled: bool },
    /// No write session.
    Idle,
}

/// Device-side playback staging shared by every player backend.
///
/// Each `start_write` opens a fresh buffer so a previous session's tail can
/// never leak into the next one. The render thread drains it with
/// [`StagedSink::pull`], which always fills the whole output slice.
pub struct StagedSink {
    geometry: AudioGeometry,
    capacity_ms: u32,
    stream: Mutex<Option<Arc<RelayBuffer>>>,
}

impl StagedSink {
    pub fn new(geometry: AudioGeometry, capacity_ms: u32) -> Result<Self, RelayError> {
        geometry.validate()?;
        if geometry.bytes_for_ms(capacity_ms as u64) < geometry.frame_bytes() {
            return Err(RelayError::FrameExceedsCapacity);
        }
        Ok(Self {
            geometry,
            capacity_ms,
            stream: Mutex::new(None),
        })
    }

    pub fn geometry(&self) -> AudioGeometry {
        self.geometry
    }

    /// Fills `out` from the queued audio, zero-filling whatever is missing.
    pub fn pull(&self, out: &mut [u8]) -> SinkPull {
        let Some(buffer) = self.stream.lock().clone() else {
            out.fill(0);
            return SinkPull::Idle;
        };

        match buffer.read(out, false) {
            Ok(ReadOutcome::Data(0)) => {
                out.fill(0);
                SinkPull::Starved
            }
            Ok(ReadOutcome::Data(n)) => {
                out[n..].fill(0);
                SinkPull::Data(n)
            }
            Ok(ReadOutcome::EndOfStream { had_error }) => {
                out.fill(0);
                self.retire(&buffer);
                SinkPull::Ended { cancelled: had_error }
            }
            Err(e) => {
                log::debug!("playback pull on retired stream: {}", e);
                out.fill(0);
                SinkPull::Idle
            }
        }
    }

    /// Drops queued audio without ending the write session.
    pub fn flush(&self) -> usize {
        self.stream
            .lock()
            .as_ref()
            .map_or(0, |buffer| buffer.discard_buffered())
    }

    pub fn buffered_duration(&self) -> u64 {
        self.stream
            .lock()
            .as_ref()
            .map_or(0, |buffer| buffer.buffered_duration())
    }

    pub fn is_writing(&self) -> bool {
        self.stream
            .lock()
            .as_ref()
            .is_some_and(|buffer| buffer.writer_state().is_open())
    }

    /// Closes and releases `buffer` if it is still the current stream.
    fn retire(&self, buffer: &Arc<RelayBuffer>) {
        let mut stream = self.stream.lock();
        if stream.as_ref().is_some_and(|current| Arc::ptr_eq(current, buffer)) {
            *stream = None;
        }
        drop(stream);

        buffer.close_write(false);
        buffer.close_read();
        if let Err(e) = buffer.dispose() {
            log::error!("Failed to release playback stream: {}", e);
        }
    }
}

impl PlaybackSink for StagedSink {
    fn start_write(&self, geometry: &AudioGeometry) -> Result<(), RelayError> {
        if !self.geometry.same_format(geometry) {
            return Err(RelayError::FormatMismatch);
        }
        let buffer = Arc::new(RelayBuffer::new(
            self.geometry.with_frame_ms(geometry.frame_ms),
            self.capacity_ms,
        )?);
        buffer.open_for_write(geometry)?;
        buffer.open_for_read(geometry)?;

        let previous = self.stream.lock().replace(buffer);
        if let Some(previous) = previous {
            log::debug!("playback stream replaced before it ended");
            self.retire(&previous);
        }
        Ok(())
    }

    fn write(&self, frame: &[u8], allow_block: bool) -> Result<usize, RelayError> {
        let buffer = self
            .stream
            .lock()
            .clone()
            .ok_or(RelayError::SideNotOpen(Side::Write))?;
        buffer.write(frame, allow_block)
    }

    fn end_write(&self, had_error: bool) {
        if let Some(buffer) = self.stream.lock().as_ref() {
            buffer.close_write(had_error);
        }
    }
}
