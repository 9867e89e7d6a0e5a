use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A block of captured audio, mono f32 samples in [-1, 1]
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for capture backends
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Channel count requested from the device
    pub channels: u16,
    /// Samples per delivered frame
    pub block_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            block_size: 4096,
        }
    }
}

/// Capacity of the frame channel between the capture thread and the session
/// loop. Frames past this bound are dropped, never queued.
pub const FRAME_CHANNEL_CAPACITY: usize = 32;

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: live cpal input stream on a dedicated thread
/// - File: WAV file framed at real-time cadence (tests, offline runs)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing into the given frame channel.
    ///
    /// Acquisition failures surface here. Starting while already active is
    /// a no-op.
    async fn start(&mut self, frames: mpsc::Sender<CaptureFrame>) -> VoiceResult<()>;

    /// Stop capturing and release the device; idempotent.
    async fn stop(&mut self) -> VoiceResult<()>;

    /// Check if the backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source selector for the factory
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Default input device
    Microphone,
    /// WAV file input (tests, offline runs)
    File(PathBuf),
}

/// Capture backend factory
pub struct CaptureBackendFactory;

impl CaptureBackendFactory {
    pub fn create(
        source: CaptureSource,
        config: CaptureConfig,
    ) -> VoiceResult<Box<dyn CaptureBackend>> {
        match source {
            CaptureSource::Microphone => Ok(Box::new(MicCapture::new(config))),
            CaptureSource::File(path) => Ok(Box::new(super::file::FileCapture::new(path, config))),
        }
    }
}

/// Microphone capture via cpal.
///
/// The input stream lives on its own thread for its whole life; the device
/// callback accumulates samples into fixed-size blocks and hands them to the
/// session over a bounded channel. The callback never blocks: if the channel
/// is full the frame is dropped and counted.
pub struct MicCapture {
    config: CaptureConfig,
    active: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            thread: None,
        }
    }

    /// Runs on the capture thread: acquires the device, reports the outcome
    /// through `ready`, then keeps the stream alive until the flag drops.
    fn run_stream(
        config: CaptureConfig,
        active: Arc<AtomicBool>,
        dropped: Arc<AtomicU64>,
        frames: mpsc::Sender<CaptureFrame>,
        ready: oneshot::Sender<VoiceResult<()>>,
    ) {
        let device = match cpal::default_host().default_input_device() {
            Some(device) => device,
            None => {
                active.store(false, Ordering::SeqCst);
                let _ = ready.send(Err(VoiceError::Acquisition(
                    "no input device available".to_string(),
                )));
                return;
            }
        };

        info!(
            "Capture device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let sample_rate = config.sample_rate;
        let block_size = config.block_size;
        let started = Instant::now();
        let callback_active = Arc::clone(&active);
        let mut block: Vec<f32> = Vec::with_capacity(block_size);

        let build_result = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !callback_active.load(Ordering::Relaxed) {
                    return;
                }

                for &sample in data {
                    block.push(sample);

                    if block.len() >= block_size {
                        let frame = CaptureFrame {
                            samples: std::mem::replace(
                                &mut block,
                                Vec::with_capacity(block_size),
                            ),
                            sample_rate,
                            timestamp_ms: started.elapsed().as_millis() as u64,
                        };

                        if frames.try_send(frame).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            },
            move |err| {
                warn!("Capture stream error: {}", err);
            },
            None,
        );

        let stream = match build_result {
            Ok(stream) => stream,
            Err(e) => {
                active.store(false, Ordering::SeqCst);
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        if let Err(e) = stream.play() {
            active.store(false, Ordering::SeqCst);
            let _ = ready.send(Err(e.into()));
            return;
        }

        let _ = ready.send(Ok(()));

        while active.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        drop(stream);
        debug!("Capture thread exited");
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicCapture {
    async fn start(&mut self, frames: mpsc::Sender<CaptureFrame>) -> VoiceResult<()> {
        if self.active.load(Ordering::SeqCst) {
            warn!("Capture already active");
            return Ok(());
        }

        info!(
            "Starting microphone capture ({} Hz, {} samples/block)",
            self.config.sample_rate, self.config.block_size
        );

        self.active.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        let config = self.config.clone();
        let active = Arc::clone(&self.active);
        let dropped = Arc::clone(&self.dropped);

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || Self::run_stream(config, active, dropped, frames, ready_tx))
            .map_err(|e| VoiceError::Acquisition(e.to_string()))?;

        self.thread = Some(thread);

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.reap_thread().await;
                Err(e)
            }
            Err(_) => {
                self.active.store(false, Ordering::SeqCst);
                self.reap_thread().await;
                Err(VoiceError::Acquisition(
                    "capture thread died during startup".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) && self.thread.is_none() {
            return Ok(());
        }

        self.reap_thread().await;

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("Capture dropped {} frames on a full channel", dropped);
        }

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "microphone (cpal)"
    }
}

impl MicCapture {
    async fn reap_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        // Capture thread watches this flag and exits when it drops
        self.active.store(false, Ordering::SeqCst);
    }
}
