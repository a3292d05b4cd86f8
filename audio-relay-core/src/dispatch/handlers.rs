use crate::models::event::RelayEvent;
use crate::traits::player::PlayerHandler;
use crate::traits::recorder::RecorderHandler;

use super::event_queue::EventSender;

/// [`RecorderHandler`] that turns every notification into a [`RelayEvent`].
pub struct RecorderEvents {
    events: EventSender,
}

impl RecorderEvents {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl RecorderHandler for RecorderEvents {
    fn on_start(&self) {
        self.events.post(RelayEvent::CaptureStarted);
    }

    fn on_start_fail(&self, reason: &str) {
        self.events.post(RelayEvent::CaptureStartFailed {
            reason: reason.to_string(),
        });
    }

    fn on_stop(&self) {
        self.events.post(RelayEvent::CaptureStopped);
    }

    fn on_buffer_full(&self) {
        self.events.post(RelayEvent::CaptureBufferFull);
    }

    fn on_error(&self, message: &str) {
        self.events.post(RelayEvent::CaptureError {
            message: message.to_string(),
        });
    }

    fn on_source_ended(&self) {
        self.events.post(RelayEvent::SourceEnded);
    }
}

/// [`PlayerHandler`] that turns every notification into a [`RelayEvent`].
pub struct PlayerEvents {
    events: EventSender,
}

impl PlayerEvents {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl PlayerHandler for PlayerEvents {
    fn on_start(&self) {
        self.events.post(RelayEvent::PlaybackStarted);
    }

    fn on_start_fail(&self, reason: &str) {
        self.events.post(RelayEvent::PlaybackStartFailed {
            reason: reason.to_string(),
        });
    }

    fn on_stop(&self) {
        self.events.post(RelayEvent::PlaybackStopped);
    }

    fn on_buffer_empty(&self) {
        self.events.post(RelayEvent::PlaybackBufferEmpty);
    }

    fn on_error(&self, message: &str) {
        self.events.post(RelayEvent::PlaybackError {
            message: message.to_string(),
        });
    }

    fn on_sink_ended(&self, cancelled: bool) {
        self.events.post(RelayEvent::SinkEnded { cancelled });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event_queue::event_queue;

    #[test]
    fn recorder_notifications_map_to_capture_events() {
        let (tx, rx) = event_queue();
        let handler = RecorderEvents::new(tx);
        handler.on_start();
        handler.on_error("device lost");
        handler.on_source_ended();
        handler.on_stop();

        assert_eq!(
            rx.drain(),
            vec![
                RelayEvent::CaptureStarted,
                RelayEvent::CaptureError {
                    message: "device lost".into()
                },
                RelayEvent::SourceEnded,
                RelayEvent::CaptureStopped,
            ]
        );
    }

    #[test]
    fn player_notifications_map_to_playback_events() {
        let (tx, rx) = event_queue();
        let handler = PlayerEvents::new(tx);
        handler.on_start_fail("no endpoint");
        handler.on_buffer_empty();
        handler.on_sink_ended(true);

        assert_eq!(
            rx.drain(),
            vec![
                RelayEvent::PlaybackStartFailed {
                    reason: "no endpoint".into()
                },
                RelayEvent::PlaybackBufferEmpty,
                RelayEvent::SinkEnded { cancelled: true },
            ]
        );
    }
}
