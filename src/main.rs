use anyhow::Result;
use clap::Parser;
use fala_live::{CaptureSource, Config, SessionConfig, VoiceSession, DEFAULT_VOICE, VOICES};
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "fala-live")]
#[command(about = "Bidirectional voice conversation client")]
struct Args {
    /// Config file stem (TOML)
    #[arg(short, long, default_value = "config/fala-live")]
    config: String,

    /// Voice persona to use for this run
    #[arg(short, long)]
    voice: Option<String>,

    /// Stream a WAV file instead of the microphone
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// List available voices and exit
    #[arg(long)]
    list_voices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();

    if args.list_voices {
        for voice in VOICES {
            if *voice == DEFAULT_VOICE {
                println!("{} (default)", voice);
            } else {
                println!("{}", voice);
            }
        }
        return Ok(());
    }

    let cfg = Config::load(&args.config)?;

    info!("Fala Live");
    info!("Loaded config: {}", cfg.service.name);
    info!("Speech service: {}", cfg.remote.url);

    let mut session = VoiceSession::new(SessionConfig::from(&cfg));

    if let Some(path) = args.input {
        info!("Capturing from file: {}", path.display());
        session = session.with_capture_source(CaptureSource::File(path));
    }

    if let Some(voice) = &args.voice {
        session.set_voice(voice).await?;
    }
    info!("Voice: {}", session.voice().await);

    session.toggle().await?;
    info!("Streaming started. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    session.toggle().await?;

    let stats = session.stats().await;
    info!(
        "Session over: {} frames sent, {} events received, {} entries in memory",
        stats.frames_sent, stats.events_received, stats.memory_entries
    );

    for entry in session.history().await.iter().rev().take(6).rev() {
        info!("[{}] {}", entry.role.context_tag(), entry.text);
    }

    Ok(())
}
