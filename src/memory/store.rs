use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Most recent entries retained in the log; older ones are evicted
pub const MEMORY_CAP: usize = 50;

const MEMORY_FILE: &str = "memory.json";
const VOICE_FILE: &str = "voice.json";

/// Speaker of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    /// Tag used when rendering context lines for the system instruction
    pub fn context_tag(&self) -> &'static str {
        match self {
            Role::User => "USUÁRIO",
            Role::Agent => "HUB",
        }
    }
}

/// One committed conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Bounded conversation log persisted as JSON, plus the voice preference.
///
/// Every append rewrites the log file synchronously, so the last committed
/// turn survives a crash. Loading is infallible: missing or unreadable
/// state starts the log empty.
pub struct MemoryStore {
    dir: PathBuf,
    entries: VecDeque<ConversationEntry>,
}

impl MemoryStore {
    pub fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();

        let entries = match fs::read(dir.join(MEMORY_FILE)) {
            Ok(bytes) => match serde_json::from_slice::<Vec<ConversationEntry>>(&bytes) {
                Ok(list) => {
                    debug!("Loaded {} conversation entries", list.len());
                    list.into_iter().collect()
                }
                Err(e) => {
                    warn!("Discarding unreadable conversation log: {}", e);
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };

        Self { dir, entries }
    }

    /// Append one turn with the current timestamp, evict past the cap, and
    /// persist. Persistence failures are logged, not raised; the
    /// conversation continues either way.
    pub fn append(&mut self, role: Role, text: impl Into<String>) {
        let entry = ConversationEntry {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        };

        self.entries.push_back(entry);
        while self.entries.len() > MEMORY_CAP {
            self.entries.pop_front();
        }

        self.persist();
    }

    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last `n` entries as role-tagged lines, oldest first, for seeding a
    /// new session with short-term context.
    pub fn recent_context(&self, n: usize) -> String {
        let start = self.entries.len().saturating_sub(n);
        self.entries
            .iter()
            .skip(start)
            .map(|e| format!("[{}]: {}", e.role.context_tag(), e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Persisted voice preference, if one was saved
    pub fn voice(&self) -> Option<String> {
        let bytes = fs::read(self.dir.join(VOICE_FILE)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn set_voice(&self, voice: &str) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create state directory: {}", e);
            return;
        }
        match serde_json::to_vec(voice) {
            Ok(bytes) => {
                if let Err(e) = fs::write(self.dir.join(VOICE_FILE), bytes) {
                    warn!("Failed to persist voice preference: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize voice preference: {}", e),
        }
    }

    fn persist(&self) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create state directory: {}", e);
            return;
        }

        let entries: Vec<&ConversationEntry> = self.entries.iter().collect();
        match serde_json::to_vec_pretty(&entries) {
            Ok(bytes) => {
                if let Err(e) = fs::write(self.dir.join(MEMORY_FILE), bytes) {
                    warn!("Failed to persist conversation log: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize conversation log: {}", e),
        }
    }
}
