use std::sync::Arc;

use crate::models::config::CaptureOptions;
use crate::models::device::AudioDevice;
use crate::models::error::RelayError;
use crate::models::geometry::AudioGeometry;

use super::capture_source::CaptureSource;

/// Lifecycle notifications from a recorder.
///
/// Called from the recorder's worker thread, not the UI thread.
/// Implementations should marshal to the UI thread if needed.
pub trait RecorderHandler: Send + Sync {
    fn on_start(&self);

    fn on_start_fail(&self, reason: &str);

    fn on_stop(&self);

    /// The device staging buffer overflowed and dropped its oldest audio.
    fn on_buffer_full(&self);

    /// A mid-stream fault. Capture keeps running until `stop` is called.
    fn on_error(&self, message: &str);

    /// The device will produce no more audio; `stop` is still required.
    fn on_source_ended(&self);
}

/// Capture component façade.
pub trait Recorder: Send + Sync {
    /// PCM format produced by [`Recorder::audio_source`].
    fn default_geometry(&self) -> AudioGeometry;

    /// Start capturing. An `Err` is an immediate start failure.
    fn start(&self, options: CaptureOptions, handler: Arc<dyn RecorderHandler>) -> Result<(), RelayError>;

    /// Stop capturing. With `discard == true` audio captured but not yet read
    /// is dropped; otherwise pending reads drain it before end-of-stream.
    fn stop(&self, discard: bool);

    /// Source for the current (or most recent) capture run.
    fn audio_source(&self) -> Arc<dyn CaptureSource>;

    fn device_info(&self) -> AudioDevice;
}
