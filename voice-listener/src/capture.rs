/// Microphone frame source
///
/// Owns the cpal input stream on a dedicated thread (cpal streams are not
/// Send) and pumps fixed 30ms frames into a tokio channel. The stream is
/// infinite and not restartable; dropping the source stops the thread and
/// releases the device.

use crate::frame::{AudioSample, Frame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::sample_buffer::PcmRing;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No default input device available")]
    NoInputDevice,

    #[error("No input device matching '{0}'")]
    NoDeviceFound(String),

    #[error("Device enumeration failed: {0}")]
    DeviceEnumeration(String),

    #[error("Unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Frame source configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input device name substring, or "default"
    pub device: String,

    /// Capture sample rate; must be 16kHz (no resampling is done)
    pub sample_rate: u32,

    /// Frames buffered toward the consumer before old ones are dropped
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: SAMPLE_RATE,
            channel_capacity: 64,
        }
    }
}

impl CaptureConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate != SAMPLE_RATE {
            return Err(CaptureError::InvalidConfig(format!(
                "sample_rate must be {} Hz, got {}",
                SAMPLE_RATE, self.sample_rate
            )));
        }

        if self.channel_capacity == 0 {
            return Err(CaptureError::InvalidConfig(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Assembles exact frames out of the PCM ring, assigning monotonic
/// sequence numbers.
pub struct FrameAssembler {
    next_seq: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self { next_seq: 0 }
    }

    /// Pop the next full frame from the ring, if one is buffered.
    pub fn next_frame(&mut self, ring: &PcmRing) -> Option<Frame> {
        let samples = ring.pop_frame(FRAME_SAMPLES)?;
        // Length is exact by construction
        let frame = Frame::new(samples, self.next_seq).ok()?;
        self.next_seq += 1;
        Some(frame)
    }

    pub fn frames_produced(&self) -> u64 {
        self.next_seq
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Live microphone frame source.
pub struct FrameSource {
    frames: mpsc::Receiver<Frame>,
    stop_tx: std_mpsc::Sender<()>,
    _capture_thread: Option<thread::JoinHandle<()>>,
}

impl FrameSource {
    /// Open the device and start capturing.
    pub fn start(config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let host = cpal::default_host();
        let device = if config.device == "default" {
            host.default_input_device()
                .ok_or(CaptureError::NoInputDevice)?
        } else {
            find_device_by_name(&host, &config.device)?
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        info!("Using input device: {}", device_name);

        let (stream_config, sample_format) = select_stream_config(&device, config.sample_rate)?;

        let (frame_tx, frame_rx) = mpsc::channel(config.channel_capacity);
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let handle = thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || run_capture_thread(device, stream_config, sample_format, frame_tx, stop_rx))
            .map_err(|e| CaptureError::StreamBuild(format!("capture thread spawn: {}", e)))?;

        Ok(Self {
            frames: frame_rx,
            stop_tx,
            _capture_thread: Some(handle),
        })
    }

    /// Receive the next frame. Returns None once the source has stopped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Discard every frame already buffered toward the consumer.
    ///
    /// Used after the consumer was busy for a while: the queued audio
    /// is stale and must not leak into the next listening window.
    /// Returns the number of frames dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.frames.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Stop capturing and release the device.
    pub fn stop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self._capture_thread.take() {
            let _ = handle.join();
        }
        debug!("Frame source stopped");
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Pick a mono config at the requested rate, or fail: the models need
/// exactly 16kHz and this crate does no resampling.
fn select_stream_config(
    device: &Device,
    sample_rate: u32,
) -> Result<(StreamConfig, cpal::SampleFormat), CaptureError> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| CaptureError::UnsupportedConfig(e.to_string()))?
        .filter(|c| c.channels() == 1)
        .find(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .ok_or_else(|| {
            CaptureError::UnsupportedConfig(format!(
                "device offers no mono config at {} Hz",
                sample_rate
            ))
        })?;

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    debug!(
        "Stream config: {} Hz mono, sample format {:?}",
        sample_rate,
        supported.sample_format()
    );

    Ok((stream_config, supported.sample_format()))
}

/// Capture thread body: builds the stream, pumps frames until stopped.
fn run_capture_thread(
    device: Device,
    config: StreamConfig,
    sample_format: cpal::SampleFormat,
    frame_tx: mpsc::Sender<Frame>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let ring = Arc::new(PcmRing::new());

    let stream = match build_input_stream(&device, &config, sample_format, ring.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build input stream: {}", e);
            return;
        }
    };

    if let Err(e) = stream.play() {
        error!("Failed to start input stream: {}", e);
        return;
    }

    debug!("Frame source thread started");
    let mut assembler = FrameAssembler::new();

    loop {
        // Drain every full frame currently buffered
        while let Some(frame) = assembler.next_frame(&ring) {
            // Drop rather than block: if the consumer stalls, losing
            // frames beats drifting behind the device clock
            if let Err(e) = frame_tx.try_send(frame) {
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        trace!("Frame channel full, dropping frame")
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        debug!("Frame consumer gone, stopping capture");
                        return;
                    }
                }
            }
        }

        // Wake up roughly twice per frame period
        match stop_rx.recv_timeout(Duration::from_millis(15)) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    debug!(
        "Frame source thread stopping after {} frames",
        assembler.frames_produced()
    );
    drop(stream);
}

/// Build the input stream, converting the device's sample format to
/// 16-bit PCM in the callback.
fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: cpal::SampleFormat,
    ring: Arc<PcmRing>,
) -> Result<cpal::Stream, CaptureError> {
    let err_fn = |err| error!("Audio stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let samples: Vec<AudioSample> = data
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .collect();
                ring.push(&samples);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                ring.push(data);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<AudioSample> = data
                    .iter()
                    .map(|&s| (s as i32 - (u16::MAX as i32 + 1) / 2) as i16)
                    .collect();
                ring.push(&samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::UnsupportedConfig(format!(
                "unsupported sample format: {:?}",
                other
            )));
        }
    }
    .map_err(|e| CaptureError::StreamBuild(e.to_string()))?;

    Ok(stream)
}

/// Find an input device by name substring
fn find_device_by_name(host: &cpal::Host, name: &str) -> Result<Device, CaptureError> {
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::DeviceEnumeration(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name.contains(name) {
                return Ok(device);
            }
        }
    }

    warn!("No input device matching '{}'", name);
    Err(CaptureError::NoDeviceFound(name.to_string()))
}

/// List all available input devices
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                devices.push(name);
            }
        }
    }

    devices
}
