use super::playback::PlaybackScheduler;
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Sink rendering the playback schedule to speakers.
///
/// The device implementation drives a real output stream; tests swap in a
/// silent sink so the session runs without audio hardware.
#[async_trait::async_trait]
pub trait OutputBackend: Send + Sync {
    /// Start rendering; acquisition failures surface here. Starting while
    /// already running is a no-op.
    async fn start(&mut self) -> VoiceResult<()>;

    /// Stop rendering and release the device; idempotent.
    async fn stop(&mut self);
}

/// Output-device rendering for the playback schedule.
///
/// Owns a cpal output stream on a dedicated thread; the device callback
/// pulls samples through [`PlaybackScheduler::render_block`], which is what
/// advances the playback clock. Without a running device nothing renders,
/// but scheduling and volume state still accept updates.
pub struct OutputDevice {
    scheduler: PlaybackScheduler,
    active: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[async_trait::async_trait]
impl OutputBackend for OutputDevice {
    async fn start(&mut self) -> VoiceResult<()> {
        if self.active.load(Ordering::SeqCst) {
            warn!("Output device already running");
            return Ok(());
        }

        self.active.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        let scheduler = self.scheduler.clone();
        let active = Arc::clone(&self.active);

        let thread = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || Self::run_stream(scheduler, active, ready_tx))
            .map_err(|e| VoiceError::Acquisition(e.to_string()))?;

        self.thread = Some(thread);

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Output device started");
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
                    "output thread died during startup".to_string(),
                ))
            }
        }
    }

    async fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.reap_thread().await;
        debug!("Output device stopped");
    }
}

impl OutputDevice {
    pub fn new(scheduler: PlaybackScheduler) -> Self {
        Self {
            scheduler,
            active: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn run_stream(
        scheduler: PlaybackScheduler,
        active: Arc<AtomicBool>,
        ready: oneshot::Sender<VoiceResult<()>>,
    ) {
        let device = match cpal::default_host().default_output_device() {
            Some(device) => device,
            None => {
                active.store(false, Ordering::SeqCst);
                let _ = ready.send(Err(VoiceError::Acquisition(
                    "no output device available".to_string(),
                )));
                return;
            }
        };

        info!(
            "Output device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(scheduler.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let render = scheduler.clone();
        let build_result = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render.render_block(data);
            },
            move |err| {
                warn!("Output stream error: {}", err);
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
        debug!("Output thread exited");
    }

    async fn reap_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        // Render thread watches this flag and exits when it drops
        self.active.store(false, Ordering::SeqCst);
    }
}
