use std::sync::Arc;

use crate::models::config::PlaybackOptions;
use crate::models::device::AudioDevice;
use crate::models::error::RelayError;
use crate::models::geometry::AudioGeometry;

use super::playback_sink::PlaybackSink;

/// Lifecycle notifications from a player.
///
/// Called from the player's render thread, not the UI thread.
pub trait PlayerHandler: Send + Sync {
    fn on_start(&self);

    fn on_start_fail(&self, reason: &str);

    fn on_stop(&self);

    /// The render thread ran out of queued audio and played silence.
    fn on_buffer_empty(&self);

    /// A mid-stream fault. Playback keeps running until `stop` is called.
    fn on_error(&self, message: &str);

    /// Everything written before `end_write` has been rendered.
    fn on_sink_ended(&self, cancelled: bool);
}

/// Playback component façade.
pub trait Player: Send + Sync {
    /// PCM format accepted by [`Player::audio_sink`].
    fn default_geometry(&self) -> AudioGeometry;

    /// Start rendering from the sink. An `Err` is an immediate start failure.
    fn start(&self, options: PlaybackOptions, handler: Arc<dyn PlayerHandler>) -> Result<(), RelayError>;

    fn stop(&self);

    fn audio_sink(&self) -> Arc<dyn PlaybackSink>;

    fn device_info(&self) -> AudioDevice;
}
