//! Live voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Microphone capture and frame encoding
//! - The duplex session with the speech service, with backoff reconnect
//! - Routing of replies into scheduled playback and conversation memory
//! - Voice selection and session statistics

mod config;
mod session;
mod stats;

pub use config::{SessionConfig, DEFAULT_VOICE, VOICES};
pub use session::{
    reconnect_delay, route_server_event, SessionState, TurnAccumulators, VoiceSession,
};
pub use stats::SessionStats;
