//! # audio-relay-core
//!
//! Platform-agnostic capture-to-playback audio relay.
//!
//! An elastic, duration-addressed buffer sits between an asynchronous capture
//! source and a playback sink and absorbs the drift between their clocks. A
//! pump keeps it near a target delay: it drains frames toward the sink (or
//! drops them while nothing plays) and refills it one capture read at a time.
//! Platform backends (Windows WASAPI) implement the `Recorder` and `Player`
//! traits and plug into the generic `RelayController`.
//!
//! ## Architecture
//!
//! ```text
//! audio-relay-core (this crate)
//! ├── traits/       ← CaptureSource, PlaybackSink, Recorder(+Handler), Player(+Handler)
//! ├── models/       ← RelayError, AudioGeometry, RelayConfig, RelayEvent, stats, summary
//! ├── processing/   ← RelayBuffer, PCM conversion
//! ├── endpoint/     ← StagedSource, StagedSink (device-side staging)
//! ├── dispatch/     ← event queue, handler → event adapters
//! └── session/      ← Pump, RelaySession, RelayController (generic orchestrator)
//! ```

pub mod dispatch;
pub mod endpoint;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use dispatch::event_queue::{event_queue, EventReceiver, EventSender};
pub use dispatch::handlers::{PlayerEvents, RecorderEvents};
pub use endpoint::staged_sink::{SinkPull, StagedSink};
pub use endpoint::staged_source::StagedSource;
pub use models::config::{CaptureOptions, PlaybackOptions, PlaybackStream, RelayConfig};
pub use models::device::{AudioDevice, DeviceKind, TransportType};
pub use models::error::{RelayError, Side};
pub use models::event::{RelayEvent, StreamEnd};
pub use models::geometry::AudioGeometry;
pub use models::state::{PumpState, SideState};
pub use models::stats::{PumpStats, RelayStats};
pub use models::summary::SessionSummary;
pub use processing::relay_buffer::{ReadOutcome, RelayBuffer};
pub use session::controller::RelayController;
pub use session::pump::{DrainPolicy, Pump};
pub use session::relay_session::RelaySession;
pub use traits::capture_source::{CaptureRead, CaptureSource, ReadCallback, END_NORMAL};
pub use traits::playback_sink::PlaybackSink;
pub use traits::player::{Player, PlayerHandler};
pub use traits::recorder::{Recorder, RecorderHandler};
