//! WASAPI player.
//!
//! Renders to a WASAPI render endpoint in shared mode. The render thread
//! pulls relay-format PCM from a `StagedSink`, converts it to the device mix
//! format and queues it on the endpoint.

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
    AudioDevice, AudioGeometry, DeviceKind, PlaybackOptions, PlaybackSink, PlaybackStream, Player,
    PlayerHandler, RelayError, SinkPull, StagedSink, TransportType,
};

use crate::com::{initialize_shared, open_endpoint, set_stream_category, start_error, ComGuard};
use crate::device_enumerator::DeviceEnumerator;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// WASAPI playback fed from a relay-format staging sink.
pub struct WasapiPlayer {
    device_id: Option<String>,
    device_name: String,
    is_default: bool,
    transport_type: Option<TransportType>,
    geometry: AudioGeometry,
    sink: Arc<StagedSink>,
    running: Arc<AtomicBool>,
    render_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WasapiPlayer {
    /// Player following the console default render endpoint.
    pub fn default_device(geometry: AudioGeometry, buffer_ms: u32) -> std::result::Result<Self, RelayError> {
        let default = DeviceEnumerator::default_device(DeviceKind::Render)?;
        let mut player = Self::with_device(&default, geometry, buffer_ms)?;
        player.device_id = None;
        Ok(player)
    }

    /// Player bound to one specific render endpoint.
    pub fn with_device(
        device: &AudioDevice,
        geometry: AudioGeometry,
        buffer_ms: u32,
    ) -> std::result::Result<Self, RelayError> {
        if device.kind != DeviceKind::Render {
            return Err(RelayError::ConfigurationFailed(format!(
                "{} is not a render endpoint",
                device.name
            )));
        }
        Ok(Self {
            device_id: Some(device.id.clone()),
            device_name: device.name.clone(),
            is_default: device.is_default,
            transport_type: device.transport_type,
            geometry,
            sink: Arc::new(StagedSink::new(geometry, buffer_ms)?),
            running: Arc::new(AtomicBool::new(false)),
            render_handle: Mutex::new(None),
        })
    }
}

impl Player for WasapiPlayer {
    fn default_geometry(&self) -> AudioGeometry {
        self.geometry
    }

    fn start(
        &self,
        options: PlaybackOptions,
        handler: Arc<dyn PlayerHandler>,
    ) -> std::result::Result<(), RelayError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = bounded(1);
        let ctx = RenderContext {
            device_id: self.device_id.clone(),
            geometry: self.geometry,
            options,
            sink: Arc::clone(&self.sink),
            running: Arc::clone(&self.running),
            handler: Arc::clone(&handler),
        };

        let handle = thread::Builder::new()
            .name("wasapi-player".into())
            .spawn(move || ctx.run(ready_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                let err = RelayError::Unknown(format!("failed to spawn player thread: {}", e));
                handler.on_start_fail(&err.to_string());
                err
            })?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(RelayError::Unknown("player thread exited during start".into())));
        if started.is_err() {
            if handle.join().is_err() {
                log::error!("player thread panicked during start");
            }
            self.running.store(false, Ordering::SeqCst);
            return started;
        }

        *self.render_handle.lock() = Some(handle);
        Ok(())
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.render_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("player thread panicked");
            }
        }
    }

    fn audio_sink(&self) -> Arc<dyn PlaybackSink> {
        self.sink.clone()
    }

    fn device_info(&self) -> AudioDevice {
        AudioDevice {
            id: self.device_id.clone().unwrap_or_else(|| "default-render".into()),
            name: self.device_name.clone(),
            kind: DeviceKind::Render,
            is_default: self.is_default,
            transport_type: self.transport_type,
        }
    }
}

impl Drop for WasapiPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stream_category(stream: PlaybackStream) -> AUDIO_STREAM_CATEGORY {
    match stream {
        PlaybackStream::Music => AudioCategory_Media,
        PlaybackStream::VoiceCall => AudioCategory_Communications,
    }
}

struct RenderContext {
    device_id: Option<String>,
    geometry: AudioGeometry,
    options: PlaybackOptions,
    sink: Arc<StagedSink>,
    running: Arc<AtomicBool>,
    handler: Arc<dyn PlayerHandler>,
}

struct RenderStream {
    client: IAudioClient,
    render: IAudioRenderClient,
    sample_rate: f64,
    channels: u16,
    buffer_frames: u32,
}

impl RenderContext {
    fn run(self, ready: Sender<std::result::Result<(), RelayError>>) {
        let opened = ComGuard::init().and_then(|com| self.open().map(|stream| (com, stream)));
        let (_com, stream) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                log::error!("Failed to start player: {}", e);
                self.running.store(false, Ordering::SeqCst);
                self.handler.on_start_fail(&e.to_string());
                let _ = ready.send(Err(e));
                return;
            }
        };

        let mut task_index: u32 = 0;
        let _mmcss = unsafe { AvSetMmThreadCharacteristicsW(w!("Playback"), &mut task_index) };

        log::info!(
            "player started ({} → {} Hz, {} ch, {:?})",
            self.geometry,
            stream.sample_rate,
            stream.channels,
            self.options.stream
        );
        self.handler.on_start();
        let _ = ready.send(Ok(()));

        self.render_loop(&stream);

        unsafe {
            if let Err(e) = stream.client.Stop() {
                log::warn!("IAudioClient::Stop failed: {}", e);
            }
        }
        drop(stream);
        let dropped = self.sink.flush();
        log::info!("player stopped ({} queued bytes dropped)", dropped);
        self.handler.on_stop();
    }

    fn open(&self) -> std::result::Result<RenderStream, RelayError> {
        let device = open_endpoint(self.device_id.as_deref(), eRender)?;
        unsafe {
            let client: IAudioClient = device.Activate(CLSCTX_ALL, None).map_err(|e| start_error(&e))?;
            set_stream_category(&client, stream_category(self.options.stream));
            let (sample_rate, channels) = initialize_shared(&client)?;
            let buffer_frames = client
                .GetBufferSize()
                .map_err(|e| RelayError::ConfigurationFailed(format!("GetBufferSize failed: {}", e)))?;
            let render: IAudioRenderClient = client
                .GetService()
                .map_err(|e| RelayError::ConfigurationFailed(format!("GetService failed: {}", e)))?;
            client.Start().map_err(|e| start_error(&e))?;
            Ok(RenderStream {
                client,
                render,
                sample_rate,
                channels,
                buffer_frames,
            })
        }
    }

    fn render_loop(&self, stream: &RenderStream) {
        let mut in_error = false;
        let mut starved = false;
        let mut device_lost = false;

        while self.running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);
            if device_lost {
                continue;
            }

            match self.render_pass(stream) {
                Ok(pull) => {
                    in_error = false;
                    match pull {
                        SinkPull::Data(_) => starved = false,
                        SinkPull::Starved => {
                            if !starved {
                                starved = true;
                                log::debug!("player starved, rendering silence");
                                self.handler.on_buffer_empty();
                            }
                        }
                        SinkPull::Ended { cancelled } => self.handler.on_sink_ended(cancelled),
                        SinkPull::Idle => {}
                    }
                }
                Err(e) => {
                    if !in_error {
                        in_error = true;
                        log::error!("Render error: {}", e);
                        self.handler.on_error(&e.to_string());
                    }
                    if e.code() == AUDCLNT_E_DEVICE_INVALIDATED {
                        device_lost = true;
                    }
                }
            }
        }
    }

    /// Fills whatever room the endpoint buffer has. `Idle` when it is full.
    fn render_pass(&self, stream: &RenderStream) -> Result<SinkPull> {
        unsafe {
            let padding = stream.client.GetCurrentPadding()?;
            let available = stream.buffer_frames.saturating_sub(padding);
            if available == 0 {
                return Ok(SinkPull::Idle);
            }

            let relay_frames =
                (available as f64 * self.geometry.sample_rate as f64 / stream.sample_rate) as usize;
            let mut relay = vec![0u8; relay_frames * self.geometry.block_align()];
            let pull = self.sink.pull(&mut relay);
            let samples = pcm::from_relay_pcm(
                &relay,
                &self.geometry,
                stream.sample_rate,
                stream.channels,
                available as usize,
            );

            let buffer_ptr = stream.render.GetBuffer(available)?;
            std::ptr::copy_nonoverlapping(samples.as_ptr(), buffer_ptr as *mut f32, samples.len());
            stream.render.ReleaseBuffer(available, 0)?;
            Ok(pull)
        }
    }
}
