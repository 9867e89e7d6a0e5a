use crate::config::Config;
use serde::{Deserialize, Serialize};

/// Voice personas offered by the speech service
pub const VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede", "Zephyr"];

/// Persona used when nothing is persisted and the config names none
pub const DEFAULT_VOICE: &str = "Kore";

/// Configuration for a live voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket endpoint of the speech service
    pub service_url: String,

    /// System-instruction prefix describing the assistant
    pub persona: String,

    /// Voice used when no preference is persisted
    pub default_voice: String,

    /// Capture sample rate in Hz (what the service expects)
    pub capture_sample_rate: u32,

    /// Playback sample rate in Hz (what the service sends back)
    pub playback_sample_rate: u32,

    /// Samples per captured block
    pub block_size: usize,

    /// Capture channel count (1 = mono)
    pub channels: u16,

    /// Directory holding the conversation log and voice preference
    pub state_dir: String,

    /// First reconnect delay; doubles per failed attempt
    pub base_delay_ms: u64,

    /// Reconnect delay ceiling
    pub max_delay_ms: u64,

    /// Pause between teardown and reopen on a voice change
    pub settle_ms: u64,
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            service_url: cfg.remote.url.clone(),
            persona: cfg.persona.instruction.clone(),
            default_voice: cfg.persona.default_voice.clone(),
            capture_sample_rate: cfg.audio.capture_sample_rate,
            playback_sample_rate: cfg.audio.playback_sample_rate,
            block_size: cfg.audio.block_size,
            channels: cfg.audio.channels,
            state_dir: cfg.memory.state_dir.clone(),
            base_delay_ms: cfg.remote.base_delay_ms,
            max_delay_ms: cfg.remote.max_delay_ms,
            settle_ms: cfg.remote.settle_ms,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::from(&Config::default())
    }
}
