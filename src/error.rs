//! Error types for the voice engine

use thiserror::Error;

/// Result type alias for engine operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors surfaced by the voice engine.
///
/// Only acquisition and configuration failures reach the caller; everything
/// that happens inside a live session (protocol noise, decode failures,
/// connection loss) is absorbed by the session loop, which drops the
/// offending data or reconnects. A deliberate stop is not an error.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device acquisition failed: {0}")]
    Acquisition(String),

    #[error("Frame encoding failed: {0}")]
    Encoding(String),

    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Audio chunk decode failed: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::Acquisition(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::Acquisition(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::Acquisition(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::Acquisition(err.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Protocol(err.to_string())
    }
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}
