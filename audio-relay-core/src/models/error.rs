use thiserror::Error;

/// Errors raised by the relay buffer, the pump's collaborators and the device backends.
///
/// Buffer overruns are deliberately absent: eviction is silent and only shows up
/// in [`RelayStats`](crate::RelayStats).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("geometry does not match the buffer format")]
    FormatMismatch,

    #[error("transfer does not fit in buffer capacity")]
    FrameExceedsCapacity,

    #[error("transfer length is not a whole number of samples")]
    Misaligned,

    #[error("{0} side is not open")]
    SideNotOpen(Side),

    #[error("{0} side is closed")]
    SideClosed(Side),

    #[error("{0} side is already open")]
    SideAlreadyOpen(Side),

    #[error("cannot dispose before both sides are closed")]
    DisposeWhileOpen,

    #[error("buffer has been disposed")]
    Disposed,

    #[error("component is already running")]
    AlreadyRunning,

    #[error("a relay session is already active")]
    SessionActive,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Which end of a stream an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Write,
    Read,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Write => f.write_str("write"),
            Side::Read => f.write_str("read"),
        }
    }
}
