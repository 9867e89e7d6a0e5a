use serde::{Deserialize, Serialize};

/// Audio frame sent to the speech service, one per captured block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundAudio {
    pub media: MediaPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded PCM16 bytes
    pub data: String,
}

impl OutboundAudio {
    pub fn pcm16(data: String, sample_rate: u32) -> Self {
        Self {
            media: MediaPayload {
                mime_type: format!("audio/pcm;rate={}", sample_rate),
                data,
            },
        }
    }
}

/// Session configuration, sent as the first frame after the socket opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSetup {
    pub voice: String,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: String,
    #[serde(rename = "audioModalities")]
    pub audio_modalities: Vec<String>,
    #[serde(rename = "transcriptionEnabled")]
    pub transcription_enabled: TranscriptionToggle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionToggle {
    pub input: bool,
    pub output: bool,
}

impl SessionSetup {
    pub fn new(voice: impl Into<String>, system_instruction: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            system_instruction: system_instruction.into(),
            audio_modalities: vec!["AUDIO".to_string()],
            transcription_enabled: TranscriptionToggle {
                input: true,
                output: true,
            },
        }
    }
}

/// One event from the speech service. Any subset of fields may be present;
/// missing fields default to inactive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEvent {
    /// The user barged in; drop queued audio and the partial agent turn
    pub interrupted: bool,
    /// Base64 PCM16 at the playback rate
    #[serde(rename = "audioData")]
    pub audio_data: Option<String>,
    #[serde(rename = "inputTranscriptionDelta")]
    pub input_transcription_delta: Option<String>,
    #[serde(rename = "outputTranscriptionDelta")]
    pub output_transcription_delta: Option<String>,
    #[serde(rename = "turnComplete")]
    pub turn_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_audio_uses_wire_field_names() {
        let frame = OutboundAudio::pcm16("QUJD".to_string(), 16000);
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["media"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["media"]["data"], "QUJD");
    }

    #[test]
    fn setup_enables_audio_and_both_transcriptions() {
        let setup = SessionSetup::new("Kore", "persona");
        let json = serde_json::to_value(&setup).unwrap();

        assert_eq!(json["voice"], "Kore");
        assert_eq!(json["audioModalities"][0], "AUDIO");
        assert_eq!(json["transcriptionEnabled"]["input"], true);
        assert_eq!(json["transcriptionEnabled"]["output"], true);
    }

    #[test]
    fn sparse_server_event_fills_defaults() {
        let event: ServerEvent = serde_json::from_str(r#"{"turnComplete": true}"#).unwrap();

        assert!(event.turn_complete);
        assert!(!event.interrupted);
        assert!(event.audio_data.is_none());
        assert!(event.input_transcription_delta.is_none());
    }

    #[test]
    fn full_server_event_parses_every_field() {
        let event: ServerEvent = serde_json::from_str(
            r#"{
                "interrupted": true,
                "audioData": "AAAA",
                "inputTranscriptionDelta": "oi",
                "outputTranscriptionDelta": "olá",
                "turnComplete": false
            }"#,
        )
        .unwrap();

        assert!(event.interrupted);
        assert_eq!(event.audio_data.as_deref(), Some("AAAA"));
        assert_eq!(event.input_transcription_delta.as_deref(), Some("oi"));
        assert_eq!(event.output_transcription_delta.as_deref(), Some("olá"));
    }
}
