use parking_lot::{Condvar, Mutex};

use crate::models::error::{RelayError, Side};
use crate::models::geometry::AudioGeometry;
use crate::models::state::SideState;
use crate::models::stats::RelayStats;

/// Result of a buffer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes copied into the caller's slice. Zero means nothing buffered yet.
    Data(usize),
    /// The write side has ended and everything written has been read.
    EndOfStream { had_error: bool },
}

struct Inner {
    storage: Vec<u8>,
    write_cursor: u64,
    read_cursor: u64,
    writer: SideState,
    reader: SideState,
    write_error: bool,
    disposed: bool,
    stats: RelayStats,
}

impl Inner {
    fn buffered(&self) -> usize {
        (self.write_cursor - self.read_cursor) as usize
    }
}

/// Bounded, duration-addressed FIFO of PCM bytes between one producer and one consumer.
///
/// Cursors are monotonic byte offsets; storage is indexed modulo capacity.
///
/// ```text
/// read_cursor <= write_cursor <= read_cursor + capacity_bytes
/// ```
///
/// Overflow behavior: a non-blocking write evicts the oldest unread bytes so
/// the producer never stalls. Each side has an explicit open/close protocol;
/// storage is released by [`RelayBuffer::dispose`] once both sides are closed.
///
/// Share with `Arc<RelayBuffer>`; the cursors live behind a
/// `parking_lot::Mutex` held only for the copy.
pub struct RelayBuffer {
    geometry: AudioGeometry,
    capacity_ms: u32,
    capacity_bytes: usize,
    inner: Mutex<Inner>,
    readable: Condvar,
    writable: Condvar,
}

impl RelayBuffer {
    /// Largest capacity a buffer will allocate.
    pub const MAX_CAPACITY_MS: u32 = 60_000;

    /// Allocates `capacity_ms` of storage for the given PCM format.
    pub fn new(geometry: AudioGeometry, capacity_ms: u32) -> Result<Self, RelayError> {
        geometry.validate()?;
        if capacity_ms > Self::MAX_CAPACITY_MS {
            return Err(RelayError::ConfigurationFailed(format!(
                "buffer capacity {} ms exceeds {} ms",
                capacity_ms,
                Self::MAX_CAPACITY_MS
            )));
        }
        let capacity_bytes = geometry.bytes_for_ms(capacity_ms as u64);
        if capacity_bytes < geometry.frame_bytes() {
            return Err(RelayError::FrameExceedsCapacity);
        }

        Ok(Self {
            geometry,
            capacity_ms,
            capacity_bytes,
            inner: Mutex::new(Inner {
                storage: vec![0; capacity_bytes],
                write_cursor: 0,
                read_cursor: 0,
                writer: SideState::Idle,
                reader: SideState::Idle,
                write_error: false,
                disposed: false,
                stats: RelayStats::default(),
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        })
    }

    pub fn geometry(&self) -> AudioGeometry {
        self.geometry
    }

    pub fn capacity_ms(&self) -> u32 {
        self.capacity_ms
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn open_for_write(&self, geometry: &AudioGeometry) -> Result<(), RelayError> {
        self.open_side(geometry, Side::Write)
    }

    pub fn open_for_read(&self, geometry: &AudioGeometry) -> Result<(), RelayError> {
        self.open_side(geometry, Side::Read)
    }

    fn open_side(&self, geometry: &AudioGeometry, side: Side) -> Result<(), RelayError> {
        if !self.geometry.same_format(geometry) {
            return Err(RelayError::FormatMismatch);
        }
        if geometry.frame_bytes() > self.capacity_bytes {
            return Err(RelayError::FrameExceedsCapacity);
        }

        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(RelayError::Disposed);
        }
        let state = match side {
            Side::Write => &mut inner.writer,
            Side::Read => &mut inner.reader,
        };
        match *state {
            SideState::Idle => {
                *state = SideState::Open;
                log::debug!("relay buffer {} side opened ({})", side, geometry);
                Ok(())
            }
            SideState::Open => Err(RelayError::SideAlreadyOpen(side)),
            SideState::Closed => Err(RelayError::SideClosed(side)),
        }
    }

    /// Appends `data` at the write cursor.
    ///
    /// With `allow_block == false` missing space is made by evicting the oldest
    /// unread bytes. With `allow_block == true` the caller waits for the reader
    /// to make room; once the read side has ended it falls back to eviction.
    pub fn write(&self, data: &[u8], allow_block: bool) -> Result<usize, RelayError> {
        if data.len() % self.geometry.block_align() != 0 {
            return Err(RelayError::Misaligned);
        }
        if data.len() > self.capacity_bytes {
            return Err(RelayError::FrameExceedsCapacity);
        }

        let mut inner = self.inner.lock();
        Self::check_side(&inner, Side::Write)?;
        if data.is_empty() {
            return Ok(0);
        }

        if allow_block {
            while self.capacity_bytes - inner.buffered() < data.len()
                && !inner.reader.is_closed()
                && !inner.disposed
            {
                self.writable.wait(&mut inner);
            }
            Self::check_side(&inner, Side::Write)?;
        }

        let overflow = (inner.buffered() + data.len()).saturating_sub(self.capacity_bytes);
        if overflow > 0 {
            inner.read_cursor += overflow as u64;
            inner.stats.bytes_evicted += overflow as u64;
            inner.stats.overruns += 1;
            log::trace!(
                "relay buffer overrun: evicted {} ms",
                self.geometry.ms_for_bytes(overflow)
            );
        }

        let start = (inner.write_cursor % self.capacity_bytes as u64) as usize;
        let first = data.len().min(self.capacity_bytes - start);
        inner.storage[start..start + first].copy_from_slice(&data[..first]);
        inner.storage[..data.len() - first].copy_from_slice(&data[first..]);

        inner.write_cursor += data.len() as u64;
        inner.stats.bytes_written += data.len() as u64;
        drop(inner);

        self.readable.notify_all();
        Ok(data.len())
    }

    /// Copies up to `out.len()` bytes (whole samples) from the read cursor.
    ///
    /// Non-blocking reads return whatever is buffered, possibly nothing. A
    /// blocking read waits until `out` can be filled, or the buffer is full
    /// when `out` is larger than capacity, or the write side ends.
    /// After the write side has ended and the backlog is drained the result
    /// is [`ReadOutcome::EndOfStream`] carrying the producer's error flag.
    pub fn read(&self, out: &mut [u8], allow_block: bool) -> Result<ReadOutcome, RelayError> {
        let wanted = self.geometry.align_down(out.len()).min(self.capacity_bytes);

        let mut inner = self.inner.lock();
        Self::check_side(&inner, Side::Read)?;

        if allow_block {
            while inner.buffered() < wanted && !inner.writer.is_closed() && !inner.disposed {
                self.readable.wait(&mut inner);
            }
            Self::check_side(&inner, Side::Read)?;
        }

        let count = wanted.min(inner.buffered());
        if count == 0 {
            if inner.writer.is_closed() && inner.buffered() == 0 {
                return Ok(ReadOutcome::EndOfStream {
                    had_error: inner.write_error,
                });
            }
            return Ok(ReadOutcome::Data(0));
        }

        let start = (inner.read_cursor % self.capacity_bytes as u64) as usize;
        let first = count.min(self.capacity_bytes - start);
        out[..first].copy_from_slice(&inner.storage[start..start + first]);
        out[first..count].copy_from_slice(&inner.storage[..count - first]);

        inner.read_cursor += count as u64;
        inner.stats.bytes_read += count as u64;
        drop(inner);

        self.writable.notify_all();
        Ok(ReadOutcome::Data(count))
    }

    /// Drops everything currently buffered. Returns the number of bytes skipped.
    pub fn discard_buffered(&self) -> usize {
        let mut inner = self.inner.lock();
        let skipped = inner.buffered();
        inner.read_cursor = inner.write_cursor;
        drop(inner);
        self.writable.notify_all();
        skipped
    }

    /// Ends the write side. Later calls keep the first error flag.
    pub fn close_write(&self, had_error: bool) {
        let mut inner = self.inner.lock();
        if inner.writer.is_closed() {
            return;
        }
        inner.writer = SideState::Closed;
        inner.write_error = had_error;
        drop(inner);

        log::debug!("relay buffer write side closed (error: {})", had_error);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Ends the read side. Idempotent.
    pub fn close_read(&self) {
        let mut inner = self.inner.lock();
        if inner.reader.is_closed() {
            return;
        }
        inner.reader = SideState::Closed;
        drop(inner);

        log::debug!("relay buffer read side closed");
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Releases storage. Rejected until both sides are closed.
    pub fn dispose(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Ok(());
        }
        if !inner.writer.is_closed() || !inner.reader.is_closed() {
            return Err(RelayError::DisposeWhileOpen);
        }
        inner.disposed = true;
        inner.storage = Vec::new();
        inner.read_cursor = inner.write_cursor;
        drop(inner);

        self.readable.notify_all();
        self.writable.notify_all();
        Ok(())
    }

    pub fn buffered_bytes(&self) -> usize {
        self.inner.lock().buffered()
    }

    /// Buffered audio in milliseconds.
    pub fn buffered_duration(&self) -> u64 {
        self.geometry.ms_for_bytes(self.buffered_bytes())
    }

    /// `(read_cursor, write_cursor)` as absolute byte offsets.
    pub fn cursors(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.read_cursor, inner.write_cursor)
    }

    pub fn writer_state(&self) -> SideState {
        self.inner.lock().writer
    }

    pub fn reader_state(&self) -> SideState {
        self.inner.lock().reader
    }

    /// True once the write side ended with an error flag.
    pub fn write_failed(&self) -> bool {
        let inner = self.inner.lock();
        inner.writer.is_closed() && inner.write_error
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    pub fn stats(&self) -> RelayStats {
        self.inner.lock().stats
    }

    fn check_side(inner: &Inner, side: Side) -> Result<(), RelayError> {
        if inner.disposed {
            return Err(RelayError::Disposed);
        }
        let state = match side {
            Side::Write => inner.writer,
            Side::Read => inner.reader,
        };
        match state {
            SideState::Open => Ok(()),
            SideState::Idle => Err(RelayError::SideNotOpen(side)),
            SideState::Closed => Err(RelayError::SideClosed(side)),
        }
    }
}

impl std::fmt::Debug for RelayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RelayBuffer")
            .field("geometry", &self.geometry)
            .field("capacity_ms", &self.capacity_ms)
            .field("read_cursor", &inner.read_cursor)
            .field("write_cursor", &inner.write_cursor)
            .field("writer", &inner.writer)
            .field("reader", &inner.reader)
            .field("disposed", &inner.disposed)
            .finish()
    }
}
