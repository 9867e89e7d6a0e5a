// Integration tests for inbound event routing
//
// These tests feed server events through the same routing function the
// session loop uses, with a real playback scheduler and a real memory
// store in a temp directory, and check what ends up scheduled and
// committed.

use anyhow::Result;
use fala_live::audio::codec;
use fala_live::{
    route_server_event, MemoryStore, PlaybackScheduler, Role, ServerEvent, TurnAccumulators,
};
use tempfile::TempDir;

/// Base64 PCM16 chunk of `len` constant samples
fn pcm_chunk(len: usize) -> String {
    codec::encode_frame(&vec![0.5f32; len]).expect("chunk must not be empty")
}

struct Fixture {
    _dir: TempDir,
    memory: MemoryStore,
    playback: PlaybackScheduler,
    acc: TurnAccumulators,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let memory = MemoryStore::load(dir.path());
        Ok(Self {
            _dir: dir,
            memory,
            playback: PlaybackScheduler::new(24000),
            acc: TurnAccumulators::default(),
        })
    }

    fn route(&mut self, event: ServerEvent) -> usize {
        route_server_event(&event, &mut self.acc, &self.playback, &mut self.memory)
    }
}

#[test]
fn test_turn_complete_commits_both_speakers() -> Result<()> {
    let mut fx = Fixture::new()?;

    fx.route(ServerEvent {
        input_transcription_delta: Some("que horas ".to_string()),
        ..Default::default()
    });
    fx.route(ServerEvent {
        input_transcription_delta: Some("são?".to_string()),
        output_transcription_delta: Some("São três.".to_string()),
        ..Default::default()
    });

    assert!(
        fx.memory.is_empty(),
        "nothing commits before the turn boundary"
    );

    let committed = fx.route(ServerEvent {
        turn_complete: true,
        ..Default::default()
    });

    assert_eq!(committed, 2);
    let entries = fx.memory.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].text, "que horas são?", "deltas concatenate verbatim");
    assert_eq!(entries[1].role, Role::Agent);
    assert_eq!(entries[1].text, "São três.");
    assert!(
        fx.acc.input.is_empty() && fx.acc.output.is_empty(),
        "accumulators reset for the next turn"
    );

    Ok(())
}

#[test]
fn test_whitespace_only_transcripts_never_commit() -> Result<()> {
    let mut fx = Fixture::new()?;

    fx.route(ServerEvent {
        input_transcription_delta: Some("  \n ".to_string()),
        output_transcription_delta: Some("\t".to_string()),
        ..Default::default()
    });
    let committed = fx.route(ServerEvent {
        turn_complete: true,
        ..Default::default()
    });

    assert_eq!(committed, 0);
    assert!(fx.memory.is_empty());

    Ok(())
}

#[test]
fn test_interruption_commits_the_partial_reply_with_a_marker() -> Result<()> {
    let mut fx = Fixture::new()?;

    fx.route(ServerEvent {
        output_transcription_delta: Some("Deixa eu te contar".to_string()),
        input_transcription_delta: Some("espera".to_string()),
        ..Default::default()
    });
    let committed = fx.route(ServerEvent {
        interrupted: true,
        ..Default::default()
    });

    assert_eq!(committed, 1);
    let entries = fx.memory.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].role, Role::Agent);
    assert_eq!(entries[0].text, "Deixa eu te contar [interrompido]");
    assert!(
        fx.acc.input.is_empty() && fx.acc.output.is_empty(),
        "both accumulators clear on interruption"
    );

    Ok(())
}

#[test]
fn test_interruption_with_no_partial_reply_commits_nothing() -> Result<()> {
    let mut fx = Fixture::new()?;

    let committed = fx.route(ServerEvent {
        interrupted: true,
        ..Default::default()
    });

    assert_eq!(committed, 0);
    assert!(fx.memory.is_empty());

    Ok(())
}

#[test]
fn test_interruption_ignores_everything_else_in_the_event() -> Result<()> {
    let mut fx = Fixture::new()?;

    fx.route(ServerEvent {
        interrupted: true,
        audio_data: Some(pcm_chunk(100)),
        input_transcription_delta: Some("perdido".to_string()),
        output_transcription_delta: Some("perdido".to_string()),
        turn_complete: true,
    });

    assert_eq!(
        fx.playback.stats().chunks_enqueued,
        0,
        "audio in an interruption event is not scheduled"
    );
    assert!(fx.memory.is_empty(), "the stale turn boundary is ignored");
    assert!(fx.acc.input.is_empty() && fx.acc.output.is_empty());

    Ok(())
}

#[test]
fn test_interruption_cancels_already_scheduled_audio() -> Result<()> {
    let mut fx = Fixture::new()?;

    fx.route(ServerEvent {
        audio_data: Some(pcm_chunk(1000)),
        ..Default::default()
    });
    fx.route(ServerEvent {
        audio_data: Some(pcm_chunk(1000)),
        ..Default::default()
    });

    // Partway into the first chunk
    let mut out = vec![0.0f32; 100];
    fx.playback.render_block(&mut out);

    fx.route(ServerEvent {
        interrupted: true,
        ..Default::default()
    });

    let stats = fx.playback.stats();
    assert_eq!(stats.active_sources, 0);
    assert_eq!(stats.cursor_samples, stats.rendered_samples);

    Ok(())
}

#[test]
fn test_audio_events_feed_the_schedule() -> Result<()> {
    let mut fx = Fixture::new()?;

    fx.route(ServerEvent {
        audio_data: Some(pcm_chunk(240)),
        ..Default::default()
    });

    let stats = fx.playback.stats();
    assert_eq!(stats.chunks_enqueued, 1);
    assert_eq!(stats.active_sources, 1);
    assert_eq!(stats.cursor_samples, 240);

    // A malformed chunk is a logged no-op
    fx.route(ServerEvent {
        audio_data: Some("%%%".to_string()),
        ..Default::default()
    });

    let stats = fx.playback.stats();
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(stats.cursor_samples, 240, "cursor untouched by the bad chunk");

    Ok(())
}

#[test]
fn test_transcripts_accumulate_across_many_small_deltas() -> Result<()> {
    let mut fx = Fixture::new()?;

    for word in ["liga ", "a ", "luz ", "da ", "sala"] {
        fx.route(ServerEvent {
            input_transcription_delta: Some(word.to_string()),
            ..Default::default()
        });
    }
    fx.route(ServerEvent {
        turn_complete: true,
        ..Default::default()
    });

    let entries = fx.memory.entries();
    assert_eq!(entries.len(), 1, "one user entry and no agent entry");
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].text, "liga a luz da sala");

    Ok(())
}
