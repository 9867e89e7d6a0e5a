pub mod capture;
pub mod codec;
pub mod file;
pub mod output;
pub mod playback;

pub use capture::{
    CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureFrame, CaptureSource, MicCapture,
    FRAME_CHANNEL_CAPACITY,
};
pub use file::FileCapture;
pub use output::{OutputBackend, OutputDevice};
pub use playback::{PlaybackScheduler, PlaybackStats, AMPLITUDE_BANDS};
