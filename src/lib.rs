pub mod audio;
pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod session;

pub use audio::{
    CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureFrame, CaptureSource,
    FileCapture, MicCapture, OutputBackend, OutputDevice, PlaybackScheduler, PlaybackStats,
    AMPLITUDE_BANDS, FRAME_CHANNEL_CAPACITY,
};
pub use config::Config;
pub use error::{VoiceError, VoiceResult};
pub use memory::{ConversationEntry, MemoryStore, Role, MEMORY_CAP};
pub use protocol::{ClientEvent, LiveClient, OutboundAudio, ServerEvent, SessionSetup};
pub use session::{
    reconnect_delay, route_server_event, SessionConfig, SessionState, SessionStats,
    TurnAccumulators, VoiceSession, DEFAULT_VOICE, VOICES,
};
