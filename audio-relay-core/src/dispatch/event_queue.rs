use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::models::event::RelayEvent;

/// Creates the queue that carries device notifications to the owning context.
///
/// Any number of senders, one receiver. Events are delivered in posting order
/// per sender and are never dropped while the receiver is alive.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<RelayEvent>,
}

impl EventSender {
    /// Posts `event`. Silently dropped once the receiver is gone.
    pub fn post(&self, event: RelayEvent) {
        if event.is_error() {
            log::warn!("posting {:?}", event);
        } else {
            log::debug!("posting {:?}", event);
        }
        if self.tx.send(event).is_err() {
            log::debug!("event receiver dropped; notification discarded");
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<RelayEvent>,
}

impl EventReceiver {
    pub fn try_next(&self) -> Option<RelayEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<RelayEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&self) -> Vec<RelayEvent> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
