/// Lifecycle of one side of a relay buffer.
///
/// ```text
/// idle → open → closed
///   └──────────↗
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SideState {
    #[default]
    Idle,
    Open,
    Closed,
}

impl SideState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Pump state machine.
///
/// State transitions:
/// ```text
/// idle → priming → draining ⇄ refilling
///           ↓          ↓          ↓
///           └──────→ ended ←──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PumpState {
    #[default]
    Idle,
    /// First read of one target delay of audio is in flight.
    Priming,
    /// Moving buffered audio toward the sink (or discarding it).
    Draining,
    /// One frame-sized capture read is in flight.
    Refilling,
    Ended,
}

impl PumpState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}
