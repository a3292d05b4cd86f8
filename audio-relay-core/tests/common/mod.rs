//! In-process recorder and player backends for driving a controller from tests.
//!
//! Both reuse the staging endpoints the device backends use; the test thread
//! plays the role of the device thread.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use audio_relay_core::{
    AudioDevice, AudioGeometry, CaptureOptions, CaptureSource, DeviceKind, PlaybackOptions,
    PlaybackSink, Player, PlayerHandler, Recorder, RecorderHandler, RelayError, SinkPull,
    StagedSink, StagedSource, StreamEnd,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn device(kind: DeviceKind, name: &str) -> AudioDevice {
    AudioDevice {
        id: format!("mock-{}", name),
        name: name.to_string(),
        kind,
        is_default: true,
        transport_type: None,
    }
}

pub struct MockRecorder {
    geometry: AudioGeometry,
    buffer_ms: u32,
    source: Mutex<Arc<StagedSource>>,
    handler: Mutex<Option<Arc<dyn RecorderHandler>>>,
    running: AtomicBool,
    fail_start: AtomicBool,
    faulted: AtomicBool,
    stops: Mutex<Vec<bool>>,
    options: Mutex<Option<CaptureOptions>>,
}

/// End code a faulted mock recorder reports when it is stopped.
pub const DEVICE_FAULT: i32 = -5;

impl MockRecorder {
    pub fn new(geometry: AudioGeometry, buffer_ms: u32) -> Self {
        let source = StagedSource::new(geometry, buffer_ms).expect("staging source");
        Self {
            geometry,
            buffer_ms,
            source: Mutex::new(Arc::new(source)),
            handler: Mutex::new(None),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            stops: Mutex::new(Vec::new()),
            options: Mutex::new(None),
        }
    }

    fn handler(&self) -> Arc<dyn RecorderHandler> {
        self.handler.lock().clone().expect("recorder started")
    }

    /// Delivers `ms` of captured audio in 100 ms device periods.
    pub fn feed(&self, ms: u32, sample: u8) {
        assert!(self.running.load(Ordering::SeqCst), "feeding a stopped recorder");
        let period = vec![sample; self.geometry.bytes_for_ms(100)];
        for _ in 0..ms / 100 {
            let source = self.source.lock().clone();
            if source.push(&period) {
                self.handler().on_buffer_full();
            }
        }
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Reports a mid-stream fault. Capture keeps running until stopped.
    pub fn raise_error(&self, message: &str) {
        self.faulted.store(true, Ordering::SeqCst);
        self.handler().on_error(message);
    }

    pub fn end_source(&self) {
        self.handler().on_source_ended();
    }

    /// `discard` flag of every `stop` call, in order.
    pub fn stops(&self) -> Vec<bool> {
        self.stops.lock().clone()
    }

    pub fn last_options(&self) -> Option<CaptureOptions> {
        *self.options.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Recorder for MockRecorder {
    fn default_geometry(&self) -> AudioGeometry {
        self.geometry
    }

    fn start(&self, options: CaptureOptions, handler: Arc<dyn RecorderHandler>) -> Result<(), RelayError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            handler.on_start_fail("microphone unavailable");
            return Err(RelayError::DeviceNotAvailable);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }
        *self.source.lock() = Arc::new(StagedSource::new(self.geometry, self.buffer_ms)?);
        self.faulted.store(false, Ordering::SeqCst);
        *self.options.lock() = Some(options);
        *self.handler.lock() = Some(Arc::clone(&handler));
        handler.on_start();
        Ok(())
    }

    fn stop(&self, discard: bool) {
        self.stops.lock().push(discard);
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let end = if self.faulted.load(Ordering::SeqCst) {
            StreamEnd::Error(DEVICE_FAULT)
        } else {
            StreamEnd::Normal
        };
        let source = self.source.lock().clone();
        source.finish(end, discard);
        self.handler().on_stop();
    }

    fn audio_source(&self) -> Arc<dyn CaptureSource> {
        self.source.lock().clone()
    }

    fn device_info(&self) -> AudioDevice {
        device(DeviceKind::Capture, "microphone")
    }
}

pub struct MockPlayer {
    geometry: AudioGeometry,
    sink: Arc<StagedSink>,
    handler: Mutex<Option<Arc<dyn PlayerHandler>>>,
    running: AtomicBool,
    fail_start: AtomicBool,
    starved: AtomicBool,
    stops: AtomicUsize,
    options: Mutex<Option<PlaybackOptions>>,
}

impl MockPlayer {
    pub fn new(geometry: AudioGeometry, buffer_ms: u32) -> Self {
        Self {
            geometry,
            sink: Arc::new(StagedSink::new(geometry, buffer_ms).expect("staging sink")),
            handler: Mutex::new(None),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            starved: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
            options: Mutex::new(None),
        }
    }

    fn handler(&self) -> Arc<dyn PlayerHandler> {
        self.handler.lock().clone().expect("player started")
    }

    /// One render pass of `ms`; returns what the device would have played.
    pub fn render(&self, ms: u32) -> (SinkPull, Vec<u8>) {
        let mut out = vec![0xff; self.geometry.bytes_for_ms(ms as u64)];
        let pull = self.sink.pull(&mut out);
        match pull {
            SinkPull::Data(_) => self.starved.store(false, Ordering::SeqCst),
            SinkPull::Starved => {
                if !self.starved.swap(true, Ordering::SeqCst) {
                    self.handler().on_buffer_empty();
                }
            }
            SinkPull::Ended { cancelled } => self.handler().on_sink_ended(cancelled),
            SinkPull::Idle => {}
        }
        (pull, out)
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn raise_error(&self, message: &str) {
        self.handler().on_error(message);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn staged_sink(&self) -> &StagedSink {
        &self.sink
    }

    pub fn last_options(&self) -> Option<PlaybackOptions> {
        *self.options.lock()
    }
}

impl Player for MockPlayer {
    fn default_geometry(&self) -> AudioGeometry {
        self.geometry
    }

    fn start(&self, options: PlaybackOptions, handler: Arc<dyn PlayerHandler>) -> Result<(), RelayError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            handler.on_start_fail("speaker unavailable");
            return Err(RelayError::DeviceNotAvailable);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }
        *self.options.lock() = Some(options);
        *self.handler.lock() = Some(Arc::clone(&handler));
        self.starved.store(false, Ordering::SeqCst);
        handler.on_start();
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.sink.flush();
        self.handler().on_stop();
    }

    fn audio_sink(&self) -> Arc<dyn PlaybackSink> {
        self.sink.clone()
    }

    fn device_info(&self) -> AudioDevice {
        device(DeviceKind::Render, "speaker")
    }
}
