//! Bounded, persisted conversation memory
//!
//! The log keeps the most recent turns of the conversation, survives
//! restarts, and renders a short role-tagged excerpt used to seed every new
//! session with context.

mod store;

pub use store::{ConversationEntry, MemoryStore, Role, MEMORY_CAP};
