use crate::models::error::RelayError;
use crate::models::event::StreamEnd;
use crate::models::geometry::AudioGeometry;

/// Return code a device layer uses for an expected end of stream.
///
/// Any other non-positive code is treated as a failure.
pub const END_NORMAL: i32 = -1;

/// Outcome of one asynchronous capture read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRead {
    /// Bytes placed at the start of the read buffer.
    Data(usize),
    End(StreamEnd),
}

impl CaptureRead {
    /// Maps a vendor-style return value: positive is a byte count, [`END_NORMAL`]
    /// a clean stop, anything else an error code.
    pub fn from_retval(retval: i32) -> Self {
        if retval > 0 {
            Self::Data(retval as usize)
        } else if retval == END_NORMAL {
            Self::End(StreamEnd::Normal)
        } else {
            Self::End(StreamEnd::Error(retval))
        }
    }
}

/// Completion for [`CaptureSource::async_read`].
///
/// Receives the caller's buffer back together with the outcome. May run on
/// any thread, including synchronously inside `async_read`.
pub type ReadCallback = Box<dyn FnOnce(Vec<u8>, CaptureRead) + Send + 'static>;

/// Pull-side contract of a capture component.
///
/// Implemented by:
/// - `StagedSource` (device-side staging used by every recorder backend)
/// - test doubles scripting completions
pub trait CaptureSource: Send + Sync {
    /// Bind the geometry of subsequent reads.
    fn start_read(&self, geometry: &AudioGeometry) -> Result<(), RelayError>;

    /// Fill up to `buffer.len()` bytes and invoke `on_complete` exactly once.
    ///
    /// At most one read is outstanding per source. A read in flight when the
    /// component stops still completes, with the tail data or an end code.
    fn async_read(&self, buffer: Vec<u8>, on_complete: ReadCallback);

    /// Release the read side.
    fn end_read(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retval_mapping() {
        assert_eq!(CaptureRead::from_retval(6400), CaptureRead::Data(6400));
        assert_eq!(CaptureRead::from_retval(END_NORMAL), CaptureRead::End(StreamEnd::Normal));
        assert_eq!(CaptureRead::from_retval(0), CaptureRead::End(StreamEnd::Error(0)));
        assert_eq!(CaptureRead::from_retval(-7), CaptureRead::End(StreamEnd::Error(-7)));
    }
}
