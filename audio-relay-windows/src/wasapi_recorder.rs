//! WASAPI recorder.
//!
//! Captures from a WASAPI capture endpoint in shared mode, converts the
//! device mix format to the relay format and stages it in a `StagedSource`
//! that the relay session reads from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use audio_relay_core::processing::pcm;
use audio_relay_core::{
    AudioDevice, AudioGeometry, CaptureOptions, CaptureSource, DeviceKind, Recorder,
    RecorderHandler, RelayError, StagedSource, StreamEnd, TransportType,
};

use crate::com::{initialize_shared, open_endpoint, set_stream_category, start_error, ComGuard};
use crate::device_enumerator::DeviceEnumerator;

/// End code reported to the relay when capture ran into a device fault.
pub const ERR_DEVICE_FAULT: i32 = -10;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// WASAPI capture into a relay-format staging source.
///
/// All COM objects live on the capture thread; the struct itself only holds
/// plain data and thread-safe handles.
pub struct WasapiRecorder {
    device_id: Option<String>,
    device_name: String,
    is_default: bool,
    transport_type: Option<TransportType>,
    geometry: AudioGeometry,
    buffer_ms: u32,
    source: Mutex<Arc<StagedSource>>,
    running: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WasapiRecorder {
    /// Recorder following the console default capture endpoint.
    pub fn default_device(geometry: AudioGeometry, buffer_ms: u32) -> std::result::Result<Self, RelayError> {
        let default = DeviceEnumerator::default_device(DeviceKind::Capture)?;
        let mut recorder = Self::with_device(&default, geometry, buffer_ms)?;
        recorder.device_id = None;
        Ok(recorder)
    }

    /// Recorder bound to one specific capture endpoint.
    pub fn with_device(
        device: &AudioDevice,
        geometry: AudioGeometry,
        buffer_ms: u32,
    ) -> std::result::Result<Self, RelayError> {
        if device.kind != DeviceKind::Capture {
            return Err(RelayError::ConfigurationFailed(format!(
                "{} is not a capture endpoint",
                device.name
            )));
        }
        let source = StagedSource::new(geometry, buffer_ms)?;
        Ok(Self {
            device_id: Some(device.id.clone()),
            device_name: device.name.clone(),
            is_default: device.is_default,
            transport_type: device.transport_type,
            geometry,
            buffer_ms,
            source: Mutex::new(Arc::new(source)),
            running: Arc::new(AtomicBool::new(false)),
            discard: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        })
    }
}

impl Recorder for WasapiRecorder {
    fn default_geometry(&self) -> AudioGeometry {
        self.geometry
    }

    fn start(
        &self,
        options: CaptureOptions,
        handler: Arc<dyn RecorderHandler>,
    ) -> std::result::Result<(), RelayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }

        let source = match StagedSource::new(self.geometry, self.buffer_ms) {
            Ok(source) => Arc::new(source),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                handler.on_start_fail(&e.to_string());
                return Err(e);
            }
        };
        *self.source.lock() = Arc::clone(&source);
        self.discard.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = bounded(1);
        let ctx = CaptureContext {
            device_id: self.device_id.clone(),
            geometry: self.geometry,
            options,
            source,
            running: Arc::clone(&self.running),
            discard: Arc::clone(&self.discard),
            handler: Arc::clone(&handler),
        };

        let handle = thread::Builder::new()
            .name("wasapi-recorder".into())
            .spawn(move || ctx.run(ready_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                let err = RelayError::Unknown(format!("failed to spawn recorder thread: {}", e));
                handler.on_start_fail(&err.to_string());
                err
            })?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(RelayError::Unknown("recorder thread exited during start".into())));
        if started.is_err() {
            if handle.join().is_err() {
                log::error!("recorder thread panicked during start");
            }
            self.running.store(false, Ordering::SeqCst);
            return started;
        }

        *self.capture_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&self, discard: bool) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.discard.store(discard, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        let handle = self.capture_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("recorder thread panicked");
            }
        }
    }

    fn audio_source(&self) -> Arc<dyn CaptureSource> {
        self.source.lock().clone()
    }

    fn device_info(&self) -> AudioDevice {
        AudioDevice {
            id: self.device_id.clone().unwrap_or_else(|| "default-capture".into()),
            name: self.device_name.clone(),
            kind: DeviceKind::Capture,
            is_default: self.is_default,
            transport_type: self.transport_type,
        }
    }
}

impl Drop for WasapiRecorder {
    fn drop(&mut self) {
        self.stop(true);
    }
}

/// Error and overflow streaks of a capture loop.
///
/// Only a fault still active when capture stops ends the stream with an
/// error; a device that recovered ends normally.
#[derive(Debug, Default)]
struct CaptureHealth {
    in_error: bool,
    overflowing: bool,
    device_lost: bool,
}

impl CaptureHealth {
    /// Records a clean poll. Returns true when a new overflow streak starts.
    fn record_ok(&mut self, overflowed: bool) -> bool {
        self.in_error = false;
        let started = overflowed && !self.overflowing;
        self.overflowing = overflowed;
        started
    }

    /// Records a failed poll. Returns true when a new error streak starts.
    fn record_error(&mut self, device_lost: bool) -> bool {
        self.device_lost |= device_lost;
        !std::mem::replace(&mut self.in_error, true)
    }

    fn end(&self) -> StreamEnd {
        if self.in_error {
            StreamEnd::Error(ERR_DEVICE_FAULT)
        } else {
            StreamEnd::Normal
        }
    }
}

/// Everything the capture thread owns.
struct CaptureContext {
    device_id: Option<String>,
    geometry: AudioGeometry,
    options: CaptureOptions,
    source: Arc<StagedSource>,
    running: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    handler: Arc<dyn RecorderHandler>,
}

struct CaptureStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    sample_rate: f64,
    channels: u16,
}

impl CaptureContext {
    fn run(self, ready: Sender<std::result::Result<(), RelayError>>) {
        let opened = ComGuard::init().and_then(|com| self.open().map(|stream| (com, stream)));
        let (_com, stream) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                log::error!("Failed to start recorder: {}", e);
                self.running.store(false, Ordering::SeqCst);
                self.handler.on_start_fail(&e.to_string());
                let _ = ready.send(Err(e));
                return;
            }
        };

        // Raise to real-time priority; capture still works without it
        let mut task_index: u32 = 0;
        let _mmcss = unsafe { AvSetMmThreadCharacteristicsW(w!("Audio"), &mut task_index) };

        log::info!(
            "recorder started ({} Hz, {} ch → {})",
            stream.sample_rate,
            stream.channels,
            self.geometry
        );
        self.handler.on_start();
        let _ = ready.send(Ok(()));

        let end = self.capture_loop(&stream);

        unsafe {
            if let Err(e) = stream.client.Stop() {
                log::warn!("IAudioClient::Stop failed: {}", e);
            }
        }
        drop(stream);
        self.source.finish(end, self.discard.load(Ordering::SeqCst));
        log::info!("recorder stopped ({:?})", end);
        self.handler.on_stop();
    }

    /// Activates and starts the endpoint. Runs on the capture thread.
    fn open(&self) -> std::result::Result<CaptureStream, RelayError> {
        let device = open_endpoint(self.device_id.as_deref(), eCapture)?;
        unsafe {
            let client: IAudioClient = device.Activate(CLSCTX_ALL, None).map_err(|e| start_error(&e))?;
            if self.options.echo_cancellation || self.options.noise_suppression {
                set_stream_category(&client, AudioCategory_Communications);
            }
            let (sample_rate, channels) = initialize_shared(&client)?;
            let capture: IAudioCaptureClient = client
                .GetService()
                .map_err(|e| RelayError::ConfigurationFailed(format!("GetService failed: {}", e)))?;
            client.Start().map_err(|e| start_error(&e))?;
            Ok(CaptureStream {
                client,
                capture,
                sample_rate,
                channels,
            })
        }
    }

    /// Polls until stopped. Returns how the capture stream ended.
    fn capture_loop(&self, stream: &CaptureStream) -> StreamEnd {
        let mut health = CaptureHealth::default();

        while self.running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            if health.device_lost {
                continue;
            }

            match self.drain_packets(stream) {
                Ok(overflowed) => {
                    if health.record_ok(overflowed) {
                        log::warn!("recorder staging full, oldest audio dropped");
                        self.handler.on_buffer_full();
                    }
                }
                Err(e) => {
                    let device_lost = e.code() == AUDCLNT_E_DEVICE_INVALIDATED;
                    if health.record_error(device_lost) {
                        log::error!("Capture error: {}", e);
                        self.handler.on_error(&e.to_string());
                    }
                    if device_lost {
                        self.handler.on_source_ended();
                    }
                }
            }
        }
        health.end()
    }

    /// Moves every available packet into the staging source.
    ///
    /// Returns true if staging had to evict audio.
    fn drain_packets(&self, stream: &CaptureStream) -> Result<bool> {
        let mut overflowed = false;
        unsafe {
            let mut packet_length = stream.capture.GetNextPacketSize()?;
            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;
                stream
                    .capture
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)?;

                if num_frames > 0 && !buffer_ptr.is_null() {
                    let total_samples = num_frames as usize * stream.channels as usize;
                    // Shared mode delivers Float32
                    let samples = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                        vec![0.0f32; total_samples]
                    } else {
                        std::slice::from_raw_parts(buffer_ptr as *const f32, total_samples).to_vec()
                    };
                    let relay =
                        pcm::to_relay_pcm(&samples, stream.sample_rate, stream.channels, &self.geometry);
                    overflowed |= self.source.push(&relay);
                }

                stream.capture.ReleaseBuffer(num_frames)?;
                packet_length = stream.capture.GetNextPacketSize()?;
            }
        }
        Ok(overflowed)
    }
}
