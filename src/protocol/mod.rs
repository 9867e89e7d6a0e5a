pub mod client;
pub mod messages;

pub use client::{ClientEvent, LiveClient};
pub use messages::{MediaPayload, OutboundAudio, ServerEvent, SessionSetup, TranscriptionToggle};
