use crate::error::VoiceResult;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub remote: RemoteConfig,
    pub memory: MemoryConfig,
    pub persona: PersonaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Capture rate expected by the speech service (Hz)
    pub capture_sample_rate: u32,
    /// Rate of audio the service sends back (Hz)
    pub playback_sample_rate: u32,
    /// Samples per captured block
    pub block_size: usize,
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// WebSocket endpoint of the speech service
    pub url: String,
    /// First reconnect delay; doubles per failed attempt
    pub base_delay_ms: u64,
    /// Reconnect delay ceiling
    pub max_delay_ms: u64,
    /// Pause between teardown and reopen on a voice change
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the conversation log and voice preference
    pub state_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    /// System instruction prefix describing the assistant's identity
    pub instruction: String,
    pub default_voice: String,
}

impl Config {
    pub fn load(path: &str) -> VoiceResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "fala-live".to_string(),
            },
            audio: AudioConfig {
                capture_sample_rate: 16000,
                playback_sample_rate: 24000,
                block_size: 4096,
                channels: 1,
            },
            remote: RemoteConfig {
                url: "wss://localhost:9090/live".to_string(),
                base_delay_ms: 1000,
                max_delay_ms: 10000,
                settle_ms: 500,
            },
            memory: MemoryConfig {
                state_dir: "state".to_string(),
            },
            persona: PersonaConfig {
                instruction: "Você é a voz central do hub, um assistente próximo e direto.\n\
                              Fale de forma natural e calorosa, em frases curtas, como numa conversa real.\n\
                              Nada de trejeitos robóticos; adapte-se ao tom e ao ritmo do usuário."
                    .to_string(),
                default_voice: "Kore".to_string(),
            },
        }
    }
}
