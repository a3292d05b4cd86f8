use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dispatch::event_queue::EventSender;
use crate::models::config::RelayConfig;
use crate::models::error::RelayError;
use crate::models::geometry::AudioGeometry;
use crate::models::state::PumpState;
use crate::models::summary::SessionSummary;
use crate::processing::relay_buffer::RelayBuffer;
use crate::traits::capture_source::CaptureSource;
use crate::traits::playback_sink::PlaybackSink;

use super::pump::{DrainPolicy, Pump};

/// One capture run: from the capture start to the pump's terminal state.
///
/// Owns the pump and, through it, the relay buffer. The controller holds at
/// most one of these and consumes it with [`RelaySession::into_summary`]
/// when the matching relay-ended event arrives.
#[derive(Debug)]
pub struct RelaySession {
    id: Uuid,
    geometry: AudioGeometry,
    started_at: DateTime<Utc>,
    pump: Arc<Pump>,
}

impl RelaySession {
    /// Opens a relay buffer, binds `source`, and issues the priming read.
    pub fn start(
        geometry: AudioGeometry,
        config: &RelayConfig,
        source: Arc<dyn CaptureSource>,
        sink: Arc<dyn PlaybackSink>,
        playing: Arc<AtomicBool>,
        events: EventSender,
    ) -> Result<Self, RelayError> {
        let policy = DrainPolicy::from_config(config);
        let buffer = Arc::new(RelayBuffer::new(geometry, config.relay_capacity_ms())?);
        if Pump::prime_bytes(&geometry, &policy) > buffer.capacity_bytes() {
            return Err(RelayError::ConfigurationFailed(format!(
                "relay capacity {} ms cannot hold a {} ms priming read",
                config.relay_capacity_ms(),
                config.target_delay_ms
            )));
        }

        buffer.open_for_write(&geometry)?;
        buffer.open_for_read(&geometry)?;
        if let Err(e) = source.start_read(&geometry) {
            buffer.close_write(true);
            buffer.close_read();
            if let Err(dispose) = buffer.dispose() {
                log::error!("Failed to release relay buffer: {}", dispose);
            }
            return Err(e);
        }

        let id = Uuid::new_v4();
        log::info!(
            "relay session {} started ({}, capacity {} ms)",
            id,
            geometry,
            buffer.capacity_ms()
        );
        let pump = Pump::new(id, policy, buffer, source, sink, playing, events);
        let session = Self {
            id,
            geometry,
            started_at: Utc::now(),
            pump,
        };
        session.pump.start();
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn geometry(&self) -> AudioGeometry {
        self.geometry
    }

    pub fn state(&self) -> PumpState {
        self.pump.state()
    }

    pub fn is_ended(&self) -> bool {
        self.pump.state().is_terminal()
    }

    /// Audio currently held between capture and playback, in milliseconds.
    pub fn buffered_duration(&self) -> u64 {
        self.pump.buffer().buffered_duration()
    }

    pub fn into_summary(self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            format: self.geometry.format_name(),
            frame_ms: self.geometry.frame_ms,
            started_at: self.started_at,
            ended_at: Utc::now(),
            end: self.pump.end(),
            buffer: self.pump.buffer().stats(),
            pump: self.pump.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event_queue::event_queue;
    use crate::endpoint::staged_sink::StagedSink;
    use crate::endpoint::staged_source::StagedSource;
    use crate::models::event::{RelayEvent, StreamEnd};
    use crate::models::state::SideState;
    use crate::traits::capture_source::ReadCallback;

    fn geometry() -> AudioGeometry {
        AudioGeometry::pcm_s16le_16k()
    }

    struct RefusingSource;

    impl CaptureSource for RefusingSource {
        fn start_read(&self, _geometry: &AudioGeometry) -> Result<(), RelayError> {
            Err(RelayError::DeviceNotAvailable)
        }

        fn async_read(&self, _buffer: Vec<u8>, _on_complete: ReadCallback) {
            panic!("no read may be issued after start_read failed");
        }

        fn end_read(&self) {}
    }

    fn sink() -> Arc<StagedSink> {
        Arc::new(StagedSink::new(geometry(), 1000).unwrap())
    }

    #[test]
    fn staged_capture_feeds_session_until_stop() {
        let source = Arc::new(StagedSource::new(geometry(), 2200).unwrap());
        let (tx, rx) = event_queue();
        let session = RelaySession::start(
            geometry(),
            &RelayConfig::default(),
            source.clone(),
            sink(),
            Arc::new(AtomicBool::new(false)),
            tx,
        )
        .unwrap();
        assert_eq!(session.state(), PumpState::Priming);

        // 3 s of capture in 100 ms pushes
        for _ in 0..30 {
            source.push(&vec![1; 3200]);
        }
        assert_eq!(session.state(), PumpState::Refilling);
        assert_eq!(session.buffered_duration(), 1600);

        source.finish(StreamEnd::Normal, false);
        assert!(session.is_ended());
        let id = session.id();
        assert_eq!(
            rx.drain(),
            vec![RelayEvent::RelayEnded {
                session_id: id,
                end: StreamEnd::Normal
            }]
        );

        let summary = session.into_summary();
        assert_eq!(summary.id, id);
        assert_eq!(summary.format, "pcm_s16le_16k");
        assert_eq!(summary.end, Some(StreamEnd::Normal));
        assert_eq!(summary.pump.frames_committed, 15);
    }

    #[test]
    fn failed_source_start_releases_buffer() {
        let (tx, rx) = event_queue();
        let err = RelaySession::start(
            geometry(),
            &RelayConfig::default(),
            Arc::new(RefusingSource),
            sink(),
            Arc::new(AtomicBool::new(false)),
            tx,
        )
        .unwrap_err();
        assert_eq!(err, RelayError::DeviceNotAvailable);
        assert!(rx.is_empty());
    }

    #[test]
    fn rejects_prime_larger_than_capacity() {
        let config = RelayConfig {
            slack_ms: 0,
            target_delay_ms: 2100,
            ..RelayConfig::default()
        };
        let (tx, _rx) = event_queue();
        let err = RelaySession::start(
            geometry(),
            &config,
            Arc::new(StagedSource::new(geometry(), 2200).unwrap()),
            sink(),
            Arc::new(AtomicBool::new(false)),
            tx,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::ConfigurationFailed(_)));
    }

    #[test]
    fn playing_session_fills_staged_sink() {
        let source = Arc::new(StagedSource::new(geometry(), 2200).unwrap());
        let sink = sink();
        sink.start_write(&geometry()).unwrap();
        let (tx, _rx) = event_queue();
        let session = RelaySession::start(
            geometry(),
            &RelayConfig::default(),
            source.clone(),
            sink.clone(),
            Arc::new(AtomicBool::new(true)),
            tx,
        )
        .unwrap();

        source.push(&vec![7; 64000]);
        // Prime 2000 ms, drained to 1800 ms: one frame reached the sink
        assert_eq!(sink.buffered_duration(), 200);
        assert_eq!(session.buffered_duration(), 1800);

        source.finish(StreamEnd::Error(-4), true);
        assert_eq!(session.state(), PumpState::Ended);
        assert_eq!(session.pump.buffer().reader_state(), SideState::Closed);
        assert_eq!(session.into_summary().end, Some(StreamEnd::Error(-4)));
    }
}
