use super::capture::{CaptureBackend, CaptureConfig, CaptureFrame};
use crate::audio::codec;
use crate::error::{VoiceError, VoiceResult};
use hound::WavReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// WAV-file capture backend.
///
/// Frames a 16-bit WAV file into block-sized frames at real-time cadence,
/// so the rest of the engine sees the same stream a microphone would
/// produce. Used by tests and by demo runs without an input device.
pub struct FileCapture {
    path: PathBuf,
    config: CaptureConfig,
    active: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl FileCapture {
    pub fn new(path: PathBuf, config: CaptureConfig) -> Self {
        Self {
            path,
            config,
            active: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            task: None,
        }
    }

    fn read_samples(&self) -> VoiceResult<Vec<f32>> {
        let reader = WavReader::open(&self.path)
            .map_err(|e| VoiceError::Acquisition(format!("{}: {}", self.path.display(), e)))?;

        let spec = reader.spec();

        if spec.sample_rate != self.config.sample_rate {
            return Err(VoiceError::Acquisition(format!(
                "expected {} Hz, file is {} Hz",
                self.config.sample_rate, spec.sample_rate
            )));
        }

        if spec.channels != self.config.channels {
            return Err(VoiceError::Acquisition(format!(
                "expected {} channel(s), file has {}",
                self.config.channels, spec.channels
            )));
        }

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(VoiceError::Acquisition(
                "only 16-bit integer WAV input is supported".to_string(),
            ));
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VoiceError::Acquisition(e.to_string()))?;

        Ok(codec::dequantize(&samples))
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileCapture {
    async fn start(&mut self, frames: mpsc::Sender<CaptureFrame>) -> VoiceResult<()> {
        if self.active.load(Ordering::SeqCst) {
            warn!("File capture already active");
            return Ok(());
        }

        let samples = self.read_samples()?;
        let sample_rate = self.config.sample_rate;
        let block_size = self.config.block_size;

        info!(
            "Starting file capture: {} ({:.1}s of audio)",
            self.path.display(),
            samples.len() as f64 / sample_rate as f64
        );

        self.active.store(true, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        let shutdown = Arc::clone(&self.shutdown);

        let task = tokio::spawn(async move {
            let block_duration = Duration::from_millis((block_size as u64 * 1000) / sample_rate as u64);
            let mut sent_samples: u64 = 0;
            let mut delivered = 0usize;

            'feed: for block in samples.chunks(block_size) {
                if !active.load(Ordering::SeqCst) {
                    break;
                }

                let frame = CaptureFrame {
                    samples: block.to_vec(),
                    sample_rate,
                    timestamp_ms: sent_samples * 1000 / sample_rate as u64,
                };
                sent_samples += block.len() as u64;

                tokio::select! {
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            break 'feed;
                        }
                        delivered += 1;
                    }
                    _ = shutdown.notified() => break 'feed,
                }

                tokio::time::sleep(block_duration).await;
            }

            active.store(false, Ordering::SeqCst);
            info!("File capture finished after {} frames", delivered);
        });

        self.task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> VoiceResult<()> {
        self.active.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("File capture task panicked: {}", e);
            }
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file (wav)"
    }
}
