use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a capture stream ended.
///
/// Only [`StreamEnd::Normal`] is a clean stop; every other code propagates an
/// error flag to the relay buffer's reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    Normal,
    Error(i32),
}

impl StreamEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Notification delivered to the UI-owning context.
///
/// Device handlers post these from their worker threads; the controller
/// drains them in posting order. None of them stops anything by itself.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    CaptureStarted,
    CaptureStartFailed { reason: String },
    CaptureStopped,
    CaptureBufferFull,
    CaptureError { message: String },
    SourceEnded,

    PlaybackStarted,
    PlaybackStartFailed { reason: String },
    PlaybackStopped,
    PlaybackBufferEmpty,
    PlaybackError { message: String },
    SinkEnded { cancelled: bool },

    /// The pump reached its terminal state and released the relay buffer.
    RelayEnded { session_id: Uuid, end: StreamEnd },
}

impl RelayEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::CaptureStartFailed { .. }
                | Self::CaptureError { .. }
                | Self::PlaybackStartFailed { .. }
                | Self::PlaybackError { .. }
        )
    }
}
