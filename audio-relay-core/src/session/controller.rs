use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::event_queue::{event_queue, EventReceiver, EventSender};
use crate::dispatch::handlers::{PlayerEvents, RecorderEvents};
use crate::models::config::RelayConfig;
use crate::models::device::AudioDevice;
use crate::models::error::RelayError;
use crate::models::event::RelayEvent;
use crate::models::geometry::AudioGeometry;
use crate::models::summary::SessionSummary;
use crate::traits::player::{Player, PlayerHandler};
use crate::traits::recorder::{Recorder, RecorderHandler};

use super::relay_session::RelaySession;

/// Capture-to-playback relay driven from one owning context.
///
/// Generic over recorder and player backends. Device notifications arrive
/// on an internal queue; [`RelayController::process_events`] applies them on
/// the caller's thread, so all state below is only touched there.
///
/// ```text
/// [Recorder] → StagedSource ─async_read→ [Pump + RelayBuffer] ─write→ StagedSink → [Player]
///      └─ handler ─┐                               │                        handler ─┘
///                  └──────────→ [event queue] ←── relay ended ←─────────────┘
///                                     ↓
///                              process_events()
/// ```
pub struct RelayController<R: Recorder, P: Player> {
    recorder: R,
    player: P,
    config: RelayConfig,
    geometry: AudioGeometry,

    // Active relay; consumed when its relay-ended event is processed
    session: Option<RelaySession>,
    last_summary: Option<SessionSummary>,

    capturing: bool,
    // Shared with the pump: gates forwarding and selects the drain margin
    playing: Arc<AtomicBool>,

    events: EventSender,
    inbox: EventReceiver,
    recorder_handler: Arc<dyn RecorderHandler>,
    player_handler: Arc<dyn PlayerHandler>,
}

impl<R: Recorder, P: Player> RelayController<R, P> {
    pub fn new(recorder: R, player: P, config: RelayConfig) -> Result<Self, RelayError> {
        config.validate().map_err(RelayError::ConfigurationFailed)?;
        let geometry = config.geometry()?;
        if !recorder.default_geometry().same_format(&geometry)
            || !player.default_geometry().same_format(&geometry)
        {
            log::error!(
                "format mismatch: relay {}, recorder {}, player {}",
                geometry,
                recorder.default_geometry(),
                player.default_geometry()
            );
            return Err(RelayError::FormatMismatch);
        }

        let (events, inbox) = event_queue();
        Ok(Self {
            recorder,
            player,
            config,
            geometry,
            session: None,
            last_summary: None,
            capturing: false,
            playing: Arc::new(AtomicBool::new(false)),
            recorder_handler: Arc::new(RecorderEvents::new(events.clone())),
            player_handler: Arc::new(PlayerEvents::new(events.clone())),
            events,
            inbox,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// True while a relay session exists, including after capture stopped
    /// and before its relay-ended event has been processed.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn buffered_duration(&self) -> u64 {
        self.session.as_ref().map_or(0, RelaySession::buffered_duration)
    }

    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    pub fn devices(&self) -> Vec<AudioDevice> {
        vec![self.recorder.device_info(), self.player.device_info()]
    }

    /// Starts the recorder and a relay session reading from it.
    ///
    /// Returns `false` if a session is still active or either start fails.
    pub fn start_capture(&mut self) -> bool {
        if self.session.is_some() {
            log::warn!("capture start ignored: previous relay session still active");
            return false;
        }

        log::info!("starting capture ({})", self.geometry);
        if let Err(e) = self
            .recorder
            .start(self.config.capture, Arc::clone(&self.recorder_handler))
        {
            log::error!("Failed to start recorder: {}", e);
            return false;
        }
        self.capturing = true;

        let geometry = self
            .recorder
            .default_geometry()
            .with_frame_ms(self.config.frame_ms);
        match RelaySession::start(
            geometry,
            &self.config,
            self.recorder.audio_source(),
            self.player.audio_sink(),
            Arc::clone(&self.playing),
            self.events.clone(),
        ) {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(e) => {
                log::error!("Failed to start relay session: {}", e);
                self.recorder.stop(true);
                self.capturing = false;
                false
            }
        }
    }

    /// Stops the recorder, letting the relay drain what was captured.
    pub fn stop_capture(&mut self) {
        log::info!("stopping capture");
        self.recorder.stop(false);
    }

    pub fn toggle_capture(&mut self) -> bool {
        if self.capturing {
            self.stop_capture();
            false
        } else {
            self.start_capture()
        }
    }

    /// Opens the player's sink and starts rendering from it.
    pub fn start_playback(&mut self) -> bool {
        if self.is_playing() {
            return true;
        }

        let sink = self.player.audio_sink();
        let geometry = self
            .player
            .default_geometry()
            .with_frame_ms(self.config.frame_ms);
        if let Err(e) = sink.start_write(&geometry) {
            log::error!("Failed to open playback sink: {}", e);
            return false;
        }

        log::info!("starting playback ({:?})", self.config.playback.stream);
        match self
            .player
            .start(self.config.playback, Arc::clone(&self.player_handler))
        {
            Ok(()) => {
                self.playing.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                log::error!("Failed to start player: {}", e);
                sink.end_write(true);
                false
            }
        }
    }

    pub fn stop_playback(&mut self) {
        log::info!("stopping playback");
        self.player.stop();
    }

    pub fn toggle_playback(&mut self) -> bool {
        if self.is_playing() {
            self.stop_playback();
            false
        } else {
            self.start_playback()
        }
    }

    /// Applies every queued notification in posting order and returns them.
    pub fn process_events(&mut self) -> Vec<RelayEvent> {
        let events = self.inbox.drain();
        for event in &events {
            self.apply(event);
        }
        events
    }

    /// Waits up to `timeout` for one notification, applies and returns it.
    pub fn wait_event(&mut self, timeout: Duration) -> Option<RelayEvent> {
        let event = self.inbox.next_timeout(timeout)?;
        self.apply(&event);
        Some(event)
    }

    fn apply(&mut self, event: &RelayEvent) {
        match event {
            RelayEvent::CaptureStarted => log::info!("recorder started"),
            RelayEvent::CaptureStartFailed { reason } => {
                log::error!("recorder start failed: {}", reason);
                self.capturing = false;
            }
            RelayEvent::CaptureStopped => {
                log::info!("recorder stopped");
                self.capturing = false;
            }
            RelayEvent::CaptureBufferFull => log::warn!("recorder buffer full"),
            RelayEvent::CaptureError { message } => {
                log::error!("recorder error: {}", message);
                if self.config.stop_on_error {
                    self.recorder.stop(true);
                }
            }
            RelayEvent::SourceEnded => self.recorder.stop(true),

            RelayEvent::PlaybackStarted => log::info!("player started"),
            RelayEvent::PlaybackStartFailed { reason } => {
                log::error!("player start failed: {}", reason);
                self.playing.store(false, Ordering::Release);
            }
            RelayEvent::PlaybackStopped => {
                log::info!("player stopped");
                self.playing.store(false, Ordering::Release);
            }
            RelayEvent::PlaybackBufferEmpty => log::debug!("player buffer empty"),
            RelayEvent::PlaybackError { message } => {
                log::error!("player error: {}", message);
                if self.config.stop_on_error {
                    self.player.stop();
                }
            }
            RelayEvent::SinkEnded { .. } => self.player.stop(),

            RelayEvent::RelayEnded { session_id, end } => {
                if self.session.as_ref().map(RelaySession::id) != Some(*session_id) {
                    log::warn!("relay-ended for unknown session {}", session_id);
                    return;
                }
                if let Some(session) = self.session.take() {
                    let summary = session.into_summary();
                    log::info!(
                        "relay session {} ended ({:?}) after {:.1}s: {}",
                        session_id,
                        end,
                        summary.duration_secs(),
                        summary.to_json()
                    );
                    self.last_summary = Some(summary);
                }
            }
        }
    }
}

impl<R: Recorder, P: Player> Drop for RelayController<R, P> {
    fn drop(&mut self) {
        if self.capturing {
            self.recorder.stop(true);
        }
        if self.is_playing() {
            self.player.stop();
        }
    }
}
