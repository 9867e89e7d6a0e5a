// Integration tests for conversation memory
//
// These tests verify the bounded, persisted conversation log: append and
// eviction, crash-safe reload, context rendering, and the persisted voice
// preference.

use anyhow::Result;
use fala_live::{MemoryStore, Role, MEMORY_CAP};
use tempfile::TempDir;

#[test]
fn test_appended_turns_survive_reload() -> Result<()> {
    let dir = TempDir::new()?;

    {
        let mut store = MemoryStore::load(dir.path());
        store.append(Role::User, "bom dia");
        store.append(Role::Agent, "bom dia! como posso ajudar?");
    }

    let store = MemoryStore::load(dir.path());
    let entries = store.entries();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].text, "bom dia");
    assert_eq!(entries[1].role, Role::Agent);
    assert_eq!(entries[1].text, "bom dia! como posso ajudar?");
    assert!(!entries[0].id.is_empty(), "entries carry generated ids");

    Ok(())
}

#[test]
fn test_log_keeps_only_the_newest_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = MemoryStore::load(dir.path());

    for i in 0..MEMORY_CAP + 5 {
        store.append(Role::User, format!("turno {}", i));
    }

    assert_eq!(store.len(), MEMORY_CAP);
    let entries = store.entries();
    assert_eq!(entries[0].text, "turno 5", "oldest entries are evicted first");
    assert_eq!(
        entries[MEMORY_CAP - 1].text,
        format!("turno {}", MEMORY_CAP + 4)
    );

    // The persisted file reflects the eviction too
    let reloaded = MemoryStore::load(dir.path());
    assert_eq!(reloaded.len(), MEMORY_CAP);
    assert_eq!(reloaded.entries()[0].text, "turno 5");

    Ok(())
}

#[test]
fn test_corrupt_log_starts_empty() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join("memory.json"), b"{ not json ]")?;

    let store = MemoryStore::load(dir.path());
    assert!(store.is_empty(), "an unreadable log is discarded, not an error");

    Ok(())
}

#[test]
fn test_missing_directory_starts_empty() {
    let store = MemoryStore::load("/definitely/not/a/real/path");
    assert!(store.is_empty());
}

#[test]
fn test_recent_context_renders_tagged_lines_oldest_first() -> Result<()> {
    let dir = TempDir::new()?;
    let mut store = MemoryStore::load(dir.path());

    store.append(Role::User, "que horas são?");
    store.append(Role::Agent, "são três da tarde.");
    store.append(Role::User, "obrigado");

    let context = store.recent_context(2);
    assert_eq!(context, "[HUB]: são três da tarde.\n[USUÁRIO]: obrigado");

    let all = store.recent_context(10);
    assert!(
        all.starts_with("[USUÁRIO]: que horas são?"),
        "asking for more entries than exist returns them all"
    );

    Ok(())
}

#[test]
fn test_empty_store_renders_empty_context() -> Result<()> {
    let dir = TempDir::new()?;
    let store = MemoryStore::load(dir.path());

    assert_eq!(store.recent_context(6), "");

    Ok(())
}

#[test]
fn test_voice_preference_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let store = MemoryStore::load(dir.path());

    assert_eq!(store.voice(), None, "no preference saved yet");

    store.set_voice("Aoede");
    assert_eq!(store.voice(), Some("Aoede".to_string()));

    let reloaded = MemoryStore::load(dir.path());
    assert_eq!(reloaded.voice(), Some("Aoede".to_string()));

    Ok(())
}
