use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::dispatch::event_queue::EventSender;
use crate::models::config::RelayConfig;
use crate::models::event::{RelayEvent, StreamEnd};
use crate::models::geometry::AudioGeometry;
use crate::models::state::PumpState;
use crate::models::stats::PumpStats;
use crate::processing::relay_buffer::{ReadOutcome, RelayBuffer};
use crate::traits::capture_source::{CaptureRead, CaptureSource};
use crate::traits::playback_sink::PlaybackSink;

/// When the pump drains the relay buffer instead of reading from capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub target_delay_ms: u32,
    pub idle_margin_ms: u32,
    pub playing_margin_ms: u32,
}

impl DrainPolicy {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            target_delay_ms: config.target_delay_ms,
            idle_margin_ms: config.drain_margin_idle_ms,
            playing_margin_ms: config.drain_margin_playing_ms,
        }
    }

    /// Buffered duration the pump drains down to.
    pub fn threshold_ms(&self, playing: bool) -> u64 {
        let margin = if playing {
            self.playing_margin_ms
        } else {
            self.idle_margin_ms
        };
        self.target_delay_ms.saturating_sub(margin) as u64
    }

    pub fn should_drain(&self, buffered_ms: u64, playing: bool) -> bool {
        buffered_ms > self.threshold_ms(playing)
    }
}

/// Where a read completion lands relative to the `async_read` call that issued it.
enum Handoff {
    /// No read outstanding, or the issuing call already returned.
    Idle,
    /// `async_read` has not returned yet; a completion arriving now is parked.
    Issuing,
    /// Completed synchronously; the issuing loop picks it up.
    Ready(Vec<u8>, CaptureRead),
}

/// Moves audio from a capture source through the relay buffer to a sink.
///
/// ```text
/// Idle -> Priming --read done--> Draining -> Refilling --read done--> Draining ...
///                                    \------- end of stream -------> Ended
/// ```
///
/// One read is outstanding at a time. Each completion re-enters the pump on
/// the thread that delivered it; a completion delivered inside `async_read`
/// itself is handed back to the issuing loop so the stack never grows.
pub struct Pump {
    session_id: Uuid,
    geometry: AudioGeometry,
    policy: DrainPolicy,
    buffer: Arc<RelayBuffer>,
    source: Arc<dyn CaptureSource>,
    sink: Arc<dyn PlaybackSink>,
    playing: Arc<AtomicBool>,
    events: EventSender,
    state: Mutex<PumpState>,
    handoff: Mutex<Handoff>,
    stats: Mutex<PumpStats>,
    end: Mutex<Option<StreamEnd>>,
}

impl Pump {
    /// `buffer` must already be open on both sides and `source` started.
    pub fn new(
        session_id: Uuid,
        policy: DrainPolicy,
        buffer: Arc<RelayBuffer>,
        source: Arc<dyn CaptureSource>,
        sink: Arc<dyn PlaybackSink>,
        playing: Arc<AtomicBool>,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            geometry: buffer.geometry(),
            policy,
            buffer,
            source,
            sink,
            playing,
            events,
            state: Mutex::new(PumpState::Idle),
            handoff: Mutex::new(Handoff::Idle),
            stats: Mutex::new(PumpStats::default()),
            end: Mutex::new(None),
        })
    }

    /// Size of the first read: the target delay rounded up to whole frames.
    pub fn prime_bytes(geometry: &AudioGeometry, policy: &DrainPolicy) -> usize {
        geometry.frames_for_ms(policy.target_delay_ms as u64) * geometry.frame_bytes()
    }

    /// Issues the priming read. Later calls are ignored.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != PumpState::Idle {
                return;
            }
            *state = PumpState::Priming;
        }
        log::info!(
            "relay {} priming {} ms ({})",
            self.session_id,
            self.policy.target_delay_ms,
            self.geometry
        );
        self.drive(vec![0; Self::prime_bytes(&self.geometry, &self.policy)]);
    }

    pub fn state(&self) -> PumpState {
        *self.state.lock()
    }

    pub fn end(&self) -> Option<StreamEnd> {
        *self.end.lock()
    }

    pub fn stats(&self) -> PumpStats {
        *self.stats.lock()
    }

    pub fn buffer(&self) -> &Arc<RelayBuffer> {
        &self.buffer
    }

    /// Issues reads until one is left outstanding or the stream ends.
    fn drive(self: &Arc<Self>, mut buf: Vec<u8>) {
        loop {
            *self.handoff.lock() = Handoff::Issuing;

            let pump = Arc::clone(self);
            self.source
                .async_read(buf, Box::new(move |buf, read| pump.on_read_complete(buf, read)));

            let ready = match std::mem::replace(&mut *self.handoff.lock(), Handoff::Idle) {
                Handoff::Ready(buf, read) => Some((buf, read)),
                Handoff::Issuing | Handoff::Idle => None,
            };
            let Some((done, read)) = ready else {
                return;
            };
            match self.complete(done, read) {
                Some(next) => buf = next,
                None => return,
            }
        }
    }

    fn on_read_complete(self: &Arc<Self>, buf: Vec<u8>, read: CaptureRead) {
        {
            let mut handoff = self.handoff.lock();
            if matches!(*handoff, Handoff::Issuing) {
                *handoff = Handoff::Ready(buf, read);
                return;
            }
        }
        if let Some(next) = self.complete(buf, read) {
            self.drive(next);
        }
    }

    /// Applies one completion. Returns the buffer for the next read, or
    /// `None` once the stream has ended.
    fn complete(&self, mut buf: Vec<u8>, read: CaptureRead) -> Option<Vec<u8>> {
        let n = match read {
            CaptureRead::Data(n) if n > 0 => n.min(buf.len()),
            CaptureRead::Data(_) => {
                self.finish(StreamEnd::Error(0));
                return None;
            }
            CaptureRead::End(end) => {
                self.finish(end);
                return None;
            }
        };

        let frame_bytes = self.geometry.frame_bytes();
        let committed = (n.div_ceil(frame_bytes) * frame_bytes).min(buf.len());
        buf[n..committed].fill(0);
        {
            let mut stats = self.stats.lock();
            stats.reads_completed += 1;
            stats.frames_committed += (committed / frame_bytes) as u64;
            if committed > n {
                stats.frames_padded += 1;
                log::debug!("short capture read: {} of {} bytes, zero-filled", n, committed);
            }
        }
        if let Err(e) = self.buffer.write(&buf[..committed], false) {
            log::error!("Failed to commit capture audio: {}", e);
        }

        *self.state.lock() = PumpState::Draining;
        buf.resize(frame_bytes, 0);
        self.drain(&mut buf);

        *self.state.lock() = PumpState::Refilling;
        Some(buf)
    }

    /// Reads frames out of the relay buffer until it is back under the threshold.
    fn drain(&self, frame: &mut [u8]) {
        let playing = self.playing.load(Ordering::Acquire);
        while self
            .policy
            .should_drain(self.buffer.buffered_duration(), playing)
        {
            let n = match self.buffer.read(frame, false) {
                Ok(ReadOutcome::Data(n)) if n > 0 => n,
                Ok(_) => break,
                Err(e) => {
                    log::error!("Failed to drain relay buffer: {}", e);
                    break;
                }
            };

            if !playing {
                self.stats.lock().frames_discarded += 1;
                continue;
            }
            match self.sink.write(&frame[..n], false) {
                Ok(_) => self.stats.lock().frames_forwarded += 1,
                Err(e) => {
                    self.stats.lock().sink_write_failures += 1;
                    log::warn!("playback sink rejected frame: {}", e);
                }
            }
        }
    }

    /// The only exit: end both buffer sides, release it, report the end.
    fn finish(&self, end: StreamEnd) {
        *self.state.lock() = PumpState::Ended;
        *self.end.lock() = Some(end);
        match end {
            StreamEnd::Normal => log::info!("relay {} capture ended", self.session_id),
            StreamEnd::Error(code) => {
                log::error!("relay {} capture failed with code {}", self.session_id, code)
            }
        }

        self.buffer.close_write(end.is_error());
        self.source.end_read();
        self.buffer.close_read();
        if let Err(e) = self.buffer.dispose() {
            log::error!("Failed to release relay buffer: {}", e);
        }

        self.events.post(RelayEvent::RelayEnded {
            session_id: self.session_id,
            end,
        });
    }
}

impl std::fmt::Debug for Pump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pump")
            .field("session_id", &self.session_id)
            .field("geometry", &self.geometry)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::dispatch::event_queue::{event_queue, EventReceiver};
    use crate::models::error::RelayError;
    use crate::models::state::SideState;
    use crate::traits::capture_source::ReadCallback;

    fn geometry() -> AudioGeometry {
        AudioGeometry::pcm_s16le_16k()
    }

    fn policy() -> DrainPolicy {
        DrainPolicy::from_config(&RelayConfig::default())
    }

    /// Completes every read inline from a script; ends normally when it runs out.
    struct ScriptedSource {
        script: Mutex<VecDeque<CaptureRead>>,
        requests: Mutex<Vec<usize>>,
        end_reads: Mutex<Vec<(SideState, bool)>>,
        buffer: Mutex<Option<Arc<RelayBuffer>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<CaptureRead>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                end_reads: Mutex::new(Vec::new()),
                buffer: Mutex::new(None),
            })
        }
    }

    impl CaptureSource for ScriptedSource {
        fn start_read(&self, _geometry: &AudioGeometry) -> Result<(), RelayError> {
            Ok(())
        }

        fn async_read(&self, mut buffer: Vec<u8>, on_complete: ReadCallback) {
            self.requests.lock().push(buffer.len());
            let read = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(CaptureRead::End(StreamEnd::Normal));
            if let CaptureRead::Data(n) = read {
                buffer[..n].fill(0x5a);
            }
            on_complete(buffer, read);
        }

        fn end_read(&self) {
            // Record the relay buffer's state at the moment the read side is released.
            let probe = self.buffer.lock().clone();
            if let Some(buffer) = probe {
                self.end_reads
                    .lock()
                    .push((buffer.reader_state(), buffer.is_disposed()));
            }
        }
    }

    /// Collects forwarded frames.
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Vec<u8>>>,
        reject: AtomicBool,
    }

    impl PlaybackSink for RecordingSink {
        fn start_write(&self, _geometry: &AudioGeometry) -> Result<(), RelayError> {
            Ok(())
        }

        fn write(&self, frame: &[u8], _allow_block: bool) -> Result<usize, RelayError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(RelayError::Stream("sink closed".into()));
            }
            self.frames.lock().push(frame.to_vec());
            Ok(frame.len())
        }

        fn end_write(&self, _had_error: bool) {}
    }

    struct Rig {
        pump: Arc<Pump>,
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
        playing: Arc<AtomicBool>,
        events: EventReceiver,
    }

    fn rig(script: Vec<CaptureRead>, playing: bool) -> Rig {
        let buffer = Arc::new(RelayBuffer::new(geometry(), 2200).unwrap());
        buffer.open_for_write(&geometry()).unwrap();
        buffer.open_for_read(&geometry()).unwrap();

        let source = ScriptedSource::new(script);
        *source.buffer.lock() = Some(Arc::clone(&buffer));
        let sink = Arc::new(RecordingSink::default());
        let playing = Arc::new(AtomicBool::new(playing));
        let (tx, rx) = event_queue();

        let pump = Pump::new(
            Uuid::new_v4(),
            policy(),
            buffer,
            source.clone(),
            sink.clone(),
            Arc::clone(&playing),
            tx,
        );
        Rig {
            pump,
            source,
            sink,
            playing,
            events: rx,
        }
    }

    fn frames(count: usize) -> Vec<CaptureRead> {
        let mut script = vec![CaptureRead::Data(64000)];
        script.extend((0..count).map(|_| CaptureRead::Data(6400)));
        script
    }

    #[test]
    fn threshold_uses_margin_for_playback_state() {
        let policy = policy();
        assert_eq!(policy.threshold_ms(false), 1600);
        assert_eq!(policy.threshold_ms(true), 1800);
        assert!(policy.should_drain(1800, false));
        assert!(!policy.should_drain(1800, true));
        assert_eq!(Pump::prime_bytes(&geometry(), &policy), 64000);
    }

    #[test]
    fn synchronous_source_primes_then_reads_single_frames() {
        let rig = rig(frames(50), false);
        rig.pump.start();

        let requests = rig.source.requests.lock().clone();
        assert_eq!(requests[0], 64000);
        assert!(requests[1..].iter().all(|&len| len == 6400));
        // Prime + 50 frames + the read that observed the end
        assert_eq!(requests.len(), 52);
        assert_eq!(rig.pump.state(), PumpState::Ended);
    }

    #[test]
    fn idle_pump_settles_at_idle_threshold() {
        let mut script = frames(30);
        script.push(CaptureRead::Data(6400));
        let rig = rig(script, false);
        rig.pump.start();

        let stats = rig.pump.stats();
        // Every completion after priming leaves 1600 ms buffered: one frame
        // discarded per frame read, two extra after the 2000 ms prime.
        assert_eq!(stats.frames_committed, 10 + 31);
        assert_eq!(stats.frames_discarded, 2 + 31);
        assert_eq!(stats.frames_forwarded, 0);
        assert!(rig.sink.frames.lock().is_empty());

        let buffer = rig.pump.buffer().stats();
        assert_eq!(buffer.bytes_written - buffer.bytes_read, 8 * 6400);
    }

    #[test]
    fn playing_pump_forwards_down_to_playing_threshold() {
        let rig = rig(frames(20), true);
        rig.pump.start();

        let stats = rig.pump.stats();
        assert_eq!(stats.frames_discarded, 0);
        // 2000 ms prime drains to 1800 ms (one frame), then one per read
        assert_eq!(stats.frames_forwarded, 1 + 20);
        let forwarded = rig.sink.frames.lock();
        assert!(forwarded.iter().all(|f| f.len() == 6400 && f[0] == 0x5a));

        let buffer = rig.pump.buffer().stats();
        assert_eq!(buffer.bytes_written - buffer.bytes_read, 9 * 6400);
        assert!(rig.playing.load(Ordering::SeqCst));
    }

    #[test]
    fn short_completion_is_padded_to_a_frame() {
        let mut script = frames(0);
        script.push(CaptureRead::Data(1000));
        let rig = rig(script, false);
        rig.pump.start();

        let stats = rig.pump.stats();
        assert_eq!(stats.frames_padded, 1);
        assert_eq!(stats.frames_committed, 11);
        let buffer = rig.pump.buffer().stats();
        assert_eq!(buffer.bytes_written, 11 * 6400);
    }

    #[test]
    fn normal_end_closes_cleanly_and_reports_once() {
        let rig = rig(frames(3), false);
        let session_id = rig.pump.session_id;
        rig.pump.start();

        assert_eq!(rig.pump.end(), Some(StreamEnd::Normal));
        let buffer = rig.pump.buffer();
        assert_eq!(buffer.writer_state(), SideState::Closed);
        assert!(!buffer.write_failed());
        assert!(buffer.is_disposed());

        assert_eq!(
            rig.events.drain(),
            vec![RelayEvent::RelayEnded {
                session_id,
                end: StreamEnd::Normal
            }]
        );
    }

    #[test]
    fn error_end_flags_buffer_and_disposes_after_read_side_closes() {
        let mut script = frames(2);
        script.push(CaptureRead::from_retval(-9));
        let rig = rig(script, true);
        rig.pump.start();

        assert_eq!(rig.pump.end(), Some(StreamEnd::Error(-9)));
        let buffer = rig.pump.buffer();
        assert!(buffer.write_failed());
        assert!(buffer.is_disposed());
        assert_eq!(buffer.reader_state(), SideState::Closed);
        // Source released while the buffer was still alive
        assert_eq!(*rig.source.end_reads.lock(), vec![(SideState::Open, false)]);
    }

    #[test]
    fn zero_length_completion_is_an_error_end() {
        let rig = rig(vec![CaptureRead::Data(0)], false);
        rig.pump.start();
        assert_eq!(rig.pump.end(), Some(StreamEnd::Error(0)));
    }

    #[test]
    fn sink_failures_are_counted_not_fatal() {
        let rig = rig(frames(5), true);
        rig.sink.reject.store(true, Ordering::SeqCst);
        rig.pump.start();

        let stats = rig.pump.stats();
        assert_eq!(stats.sink_write_failures, 6);
        assert_eq!(stats.frames_forwarded, 0);
        assert_eq!(rig.pump.end(), Some(StreamEnd::Normal));
    }

    #[test]
    fn start_is_one_shot() {
        let rig = rig(frames(1), false);
        rig.pump.start();
        let issued = rig.source.requests.lock().len();
        rig.pump.start();
        assert_eq!(rig.source.requests.lock().len(), issued);
    }
}
