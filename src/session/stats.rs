use crate::audio::PlaybackStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::SessionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Where the connection lifecycle currently stands
    pub state: SessionState,

    /// Whether a session with the speech service is open
    pub is_connected: bool,

    /// Whether capture and playback are running
    pub is_streaming: bool,

    /// When this session object was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds since creation
    pub duration_secs: f64,

    /// Audio frames sent to the service so far
    pub frames_sent: usize,

    /// Events received from the service so far
    pub events_received: usize,

    /// Transcript entries committed to memory by this session
    pub turns_committed: usize,

    /// Times the session dropped and a reconnect was attempted
    pub reconnects: usize,

    /// Entries currently held in conversation memory
    pub memory_entries: usize,

    /// State of the playback side
    pub playback: PlaybackStats,
}
