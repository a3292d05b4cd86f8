use crate::models::error::RelayError;
use crate::models::geometry::AudioGeometry;

/// Push-side contract of a playback component.
pub trait PlaybackSink: Send + Sync {
    /// Bind the geometry of subsequent writes. Starts a fresh stream.
    fn start_write(&self, geometry: &AudioGeometry) -> Result<(), RelayError>;

    /// Queue `frame` for rendering. Returns the number of bytes accepted.
    ///
    /// The relay always passes `allow_block == false`; the sink then drops
    /// its own oldest audio rather than stall the caller.
    fn write(&self, frame: &[u8], allow_block: bool) -> Result<usize, RelayError>;

    /// End the stream; `had_error` marks an abnormal end.
    fn end_write(&self, had_error: bool);
}
