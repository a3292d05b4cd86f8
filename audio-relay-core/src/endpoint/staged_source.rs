use parking_lot::Mutex;

use crate::models::error::RelayError;
use crate::models::event::StreamEnd;
use crate::models::geometry::AudioGeometry;
use crate::processing::relay_buffer::{ReadOutcome, RelayBuffer};
use crate::traits::capture_source::{CaptureRead, CaptureSource, ReadCallback};

/// Completion code for a read issued before `start_read` or after `end_read`.
pub const ERR_NOT_READING: i32 = -2;

/// Completion code for a second read issued while one is still parked.
pub const ERR_READ_PENDING: i32 = -3;

struct StagingState {
    reading: bool,
    pending: Option<(Vec<u8>, ReadCallback)>,
    end: Option<StreamEnd>,
}

/// Device-side capture staging shared by every recorder backend.
///
/// The device thread converts audio to the relay format and [`push`]es it;
/// readers see a [`CaptureSource`]. At most one read is parked at a time and
/// is completed on whichever thread makes it satisfiable:
///
/// ```text
/// [capture thread] --push--> [RelayBuffer] --fill--> parked read --> completion
///                  --finish(end, discard)-------------^ (short tail or end code)
/// ```
///
/// Overflow behavior: drops oldest audio, reported by `push` so the recorder
/// can raise buffer-full.
///
/// [`push`]: StagedSource::push
pub struct StagedSource {
    geometry: AudioGeometry,
    buffer: RelayBuffer,
    state: Mutex<StagingState>,
}

impl StagedSource {
    pub fn new(geometry: AudioGeometry, capacity_ms: u32) -> Result<Self, RelayError> {
        let buffer = RelayBuffer::new(geometry, capacity_ms)?;
        buffer.open_for_write(&geometry)?;
        buffer.open_for_read(&geometry)?;

        Ok(Self {
            geometry,
            buffer,
            state: Mutex::new(StagingState {
                reading: false,
                pending: None,
                end: None,
            }),
        })
    }

    pub fn geometry(&self) -> AudioGeometry {
        self.geometry
    }

    /// Stage captured PCM. Returns `true` when older audio had to be evicted.
    ///
    /// Audio pushed after [`StagedSource::finish`] is ignored.
    pub fn push(&self, pcm: &[u8]) -> bool {
        if self.state.lock().end.is_some() {
            return false;
        }

        let evicted_before = self.buffer.stats().bytes_evicted;
        let pcm = &pcm[..self.geometry.align_down(pcm.len())];
        let chunk = self.geometry.align_down(self.buffer.capacity_bytes());
        for part in pcm.chunks(chunk.max(1)) {
            if let Err(e) = self.buffer.write(part, false) {
                log::debug!("staged capture dropped {} bytes: {}", part.len(), e);
                break;
            }
        }
        let overrun = self.buffer.stats().bytes_evicted > evicted_before;

        self.service_pending();
        overrun
    }

    /// End the stream. Completes a parked read with whatever is left (a short
    /// read) or, once empty, with `end`. Later calls are ignored.
    pub fn finish(&self, end: StreamEnd, discard: bool) {
        {
            let mut state = self.state.lock();
            if state.end.is_some() {
                return;
            }
            state.end = Some(end);
        }

        if discard {
            let dropped = self.buffer.discard_buffered();
            if dropped > 0 {
                log::debug!(
                    "staged capture discarded {} ms on stop",
                    self.geometry.ms_for_bytes(dropped)
                );
            }
        }
        self.buffer.close_write(end.is_error());
        self.service_pending();
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().end.is_some()
    }

    pub fn buffered_duration(&self) -> u64 {
        self.buffer.buffered_duration()
    }

    /// Completes the parked read if it can be satisfied now.
    fn service_pending(&self) {
        let ready = {
            let mut state = self.state.lock();
            let wanted = match state.pending.as_ref() {
                Some((buf, _)) => self.geometry.align_down(buf.len()).min(self.buffer.capacity_bytes()),
                None => return,
            };
            if state.end.is_none() && self.buffer.buffered_bytes() < wanted {
                return;
            }
            state.pending.take()
        };

        // Completion runs without the state lock held: it may issue the next read.
        if let Some((mut buf, on_complete)) = ready {
            let read = self.fill(&mut buf);
            on_complete(buf, read);
        }
    }

    fn fill(&self, buf: &mut [u8]) -> CaptureRead {
        match self.buffer.read(buf, false) {
            Ok(ReadOutcome::Data(n)) if n > 0 => CaptureRead::Data(n),
            _ => CaptureRead::End(self.state.lock().end.unwrap_or(StreamEnd::Normal)),
        }
    }
}

impl CaptureSource for StagedSource {
    fn start_read(&self, geometry: &AudioGeometry) -> Result<(), RelayError> {
        if !self.geometry.same_format(geometry) {
            return Err(RelayError::FormatMismatch);
        }
        self.state.lock().reading = true;
        Ok(())
    }

    fn async_read(&self, buffer: Vec<u8>, on_complete: ReadCallback) {
        let mut state = self.state.lock();
        let code = if !state.reading {
            ERR_NOT_READING
        } else if state.pending.is_some() {
            ERR_READ_PENDING
        } else {
            state.pending = Some((buffer, on_complete));
            drop(state);
            self.service_pending();
            return;
        };
        drop(state);

        log::warn!("capture read rejected with code {}", code);
        on_complete(buffer, CaptureRead::End(StreamEnd::Error(code)));
    }

    fn end_read(&self) {
        let parked = {
            let mut state = self.state.lock();
            state.reading = false;
            state.pending.take()
        };
        if let Some((buf, on_complete)) = parked {
            on_complete(buf, CaptureRead::End(StreamEnd::Normal));
        }
    }
}
