use super::config::{SessionConfig, DEFAULT_VOICE, VOICES};
use super::stats::SessionStats;
use crate::audio::codec;
use crate::audio::{
    CaptureBackend, CaptureBackendFactory, CaptureConfig, CaptureFrame, CaptureSource,
    OutputBackend, OutputDevice, PlaybackScheduler, FRAME_CHANNEL_CAPACITY,
};
use crate::error::{VoiceError, VoiceResult};
use crate::memory::{ConversationEntry, MemoryStore, Role};
use crate::protocol::{ClientEvent, LiveClient, OutboundAudio, ServerEvent, SessionSetup};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Entries of recent conversation injected into each new session's
/// system instruction
const CONTEXT_ENTRIES: usize = 6;

/// Ceiling on a single session-open handshake
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where the connection lifecycle currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Never started
    Idle,
    /// Opening a session with the speech service
    Connecting,
    /// Session established, frames flowing both ways
    Open,
    /// Session dropped; waiting out the backoff delay
    Reconnecting,
    /// Deliberately stopped
    Closed,
}

/// Control messages from the facade into the session loop
#[derive(Debug)]
enum Control {
    Stop,
    SwapVoice,
}

/// Partial transcripts for the turn currently in flight
#[derive(Debug, Default)]
pub struct TurnAccumulators {
    /// What the user has said so far this turn
    pub input: String,
    /// What the agent has said so far this turn
    pub output: String,
}

/// Delay before reconnect attempt `attempt`: base doubled per attempt,
/// capped at the ceiling.
pub fn reconnect_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Route one inbound event into playback and conversation memory.
///
/// An interruption wins over everything else in the same event: queued
/// audio is dropped, a partial agent turn is committed with a marker, and
/// the rest of the event is ignored. Otherwise audio is scheduled, then
/// transcript deltas accumulate, then a turn boundary commits whatever
/// accumulated. Returns how many entries were committed.
pub fn route_server_event(
    event: &ServerEvent,
    acc: &mut TurnAccumulators,
    playback: &PlaybackScheduler,
    memory: &mut MemoryStore,
) -> usize {
    if event.interrupted {
        debug!("Barge-in: clearing scheduled audio and partial turn");
        playback.cancel_all();

        let mut committed = 0;
        if !acc.output.trim().is_empty() {
            memory.append(Role::Agent, format!("{} [interrompido]", acc.output));
            committed += 1;
        }
        acc.output.clear();
        acc.input.clear();
        return committed;
    }

    if let Some(audio) = &event.audio_data {
        playback.enqueue(audio);
    }

    if let Some(delta) = &event.input_transcription_delta {
        acc.input.push_str(delta);
    }
    if let Some(delta) = &event.output_transcription_delta {
        acc.output.push_str(delta);
    }

    let mut committed = 0;
    if event.turn_complete {
        if !acc.input.trim().is_empty() {
            memory.append(Role::User, acc.input.clone());
            acc.input.clear();
            committed += 1;
        }
        if !acc.output.trim().is_empty() {
            memory.append(Role::Agent, acc.output.clone());
            acc.output.clear();
            committed += 1;
        }
    }
    committed
}

/// System instruction for a new session: fixed persona plus a short tail
/// of the conversation so the agent keeps its thread across reconnects.
fn build_instruction(persona: &str, context: &str) -> String {
    if context.is_empty() {
        return persona.to_string();
    }
    format!(
        "{}\n\n=== MEMÓRIA DE CURTO PRAZO (Contexto da Conversa) ===\n{}\n====================================================",
        persona, context
    )
}

/// How an open session ended, from the loop's point of view
enum CloseOutcome {
    /// Deliberate stop; no reconnect
    Stop,
    /// Voice changed; settle briefly and reopen
    Swap,
    /// Peer closed, stream error, or the open attempt failed
    Lost,
}

/// Everything the session loop shares with the facade
struct SessionShared {
    config: SessionConfig,
    playback: PlaybackScheduler,
    memory: Arc<Mutex<MemoryStore>>,
    selected_voice: Arc<Mutex<String>>,
    state: Arc<Mutex<SessionState>>,
    is_streaming: Arc<AtomicBool>,
    is_connected: Arc<AtomicBool>,
    frames_sent: Arc<AtomicUsize>,
    events_received: Arc<AtomicUsize>,
    turns_committed: Arc<AtomicUsize>,
    reconnects: Arc<AtomicUsize>,
}

async fn set_state(state: &Mutex<SessionState>, next: SessionState) {
    let mut current = state.lock().await;
    if *current != next {
        debug!("Session state {:?} -> {:?}", *current, next);
        *current = next;
    }
}

/// Connection loop: connect, pump frames and events, and on loss back off
/// and reconnect until told to stop. Capture frames that arrive while no
/// session is open are discarded, never queued for later.
async fn run_loop(
    shared: SessionShared,
    mut frames_rx: mpsc::Receiver<CaptureFrame>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
) {
    let mut attempt: u32 = 0;
    let mut frames_done = false;

    'session: loop {
        set_state(&shared.state, SessionState::Connecting).await;

        let instruction = {
            let memory = shared.memory.lock().await;
            build_instruction(&shared.config.persona, &memory.recent_context(CONTEXT_ENTRIES))
        };
        let voice = shared.selected_voice.lock().await.clone();
        let setup = SessionSetup::new(voice, instruction);

        // The handshake stays interruptible: a stop or voice change must
        // not wait out a peer that never answers
        let connect = timeout(
            CONNECT_TIMEOUT,
            LiveClient::connect(&shared.config.service_url, &setup),
        );
        tokio::pin!(connect);
        let connected = loop {
            tokio::select! {
                result = &mut connect => break result,
                frame = frames_rx.recv(), if !frames_done => {
                    if frame.is_none() {
                        frames_done = true;
                    }
                }
                control = control_rx.recv() => {
                    match control {
                        Some(Control::Stop) | None => {
                            set_state(&shared.state, SessionState::Closed).await;
                            break 'session;
                        }
                        // Abandon this attempt; the next one carries the new voice
                        Some(Control::SwapVoice) => continue 'session,
                    }
                }
            }
        };

        let outcome = match connected {
            Ok(Ok((client, mut events_rx))) => {
                // Frames captured while the session was down are stale
                while frames_rx.try_recv().is_ok() {}

                set_state(&shared.state, SessionState::Open).await;
                shared.is_connected.store(true, Ordering::SeqCst);
                attempt = 0;

                let mut acc = TurnAccumulators::default();
                let outcome = 'open: loop {
                    tokio::select! {
                        frame = frames_rx.recv(), if !frames_done => {
                            match frame {
                                Some(frame) => match codec::encode_frame(&frame.samples) {
                                    Ok(encoded) => {
                                        client.send_audio(&OutboundAudio::pcm16(
                                            encoded,
                                            frame.sample_rate,
                                        ));
                                        shared.frames_sent.fetch_add(1, Ordering::SeqCst);
                                    }
                                    Err(e) => debug!("Skipping capture frame: {}", e),
                                },
                                None => {
                                    info!("Capture input finished");
                                    frames_done = true;
                                }
                            }
                        }
                        event = events_rx.recv() => {
                            match event {
                                Some(ClientEvent::Event(event)) => {
                                    shared.events_received.fetch_add(1, Ordering::SeqCst);
                                    let committed = {
                                        let mut memory = shared.memory.lock().await;
                                        route_server_event(
                                            &event,
                                            &mut acc,
                                            &shared.playback,
                                            &mut memory,
                                        )
                                    };
                                    if committed > 0 {
                                        shared
                                            .turns_committed
                                            .fetch_add(committed, Ordering::SeqCst);
                                    }
                                }
                                Some(ClientEvent::Closed { code, reason }) => {
                                    warn!(
                                        "Session closed by peer (code={:?}, reason={})",
                                        code, reason
                                    );
                                    break 'open CloseOutcome::Lost;
                                }
                                None => break 'open CloseOutcome::Lost,
                            }
                        }
                        control = control_rx.recv() => {
                            match control {
                                Some(Control::Stop) | None => break 'open CloseOutcome::Stop,
                                Some(Control::SwapVoice) => break 'open CloseOutcome::Swap,
                            }
                        }
                    }
                };

                shared.is_connected.store(false, Ordering::SeqCst);
                // Unblocks the connection task if the event channel backed up
                drop(events_rx);
                client.close().await;
                outcome
            }
            Ok(Err(e)) => {
                warn!("Failed to open session: {}", e);
                CloseOutcome::Lost
            }
            Err(_) => {
                warn!("Session open timed out after {:?}", CONNECT_TIMEOUT);
                CloseOutcome::Lost
            }
        };

        match outcome {
            CloseOutcome::Stop => {
                set_state(&shared.state, SessionState::Closed).await;
                break 'session;
            }
            CloseOutcome::Swap => {
                info!("Rebuilding session after voice change");
                // Replies scheduled under the old voice must not play into
                // the new session
                shared.playback.cancel_all();
                let settle = sleep(Duration::from_millis(shared.config.settle_ms));
                tokio::pin!(settle);
                loop {
                    tokio::select! {
                        _ = &mut settle => break,
                        frame = frames_rx.recv(), if !frames_done => {
                            if frame.is_none() {
                                frames_done = true;
                            }
                        }
                        control = control_rx.recv() => {
                            match control {
                                Some(Control::Stop) | None => {
                                    set_state(&shared.state, SessionState::Closed).await;
                                    break 'session;
                                }
                                Some(Control::SwapVoice) => {}
                            }
                        }
                    }
                }
            }
            CloseOutcome::Lost => {
                if !shared.is_streaming.load(Ordering::SeqCst) {
                    set_state(&shared.state, SessionState::Closed).await;
                    break 'session;
                }

                set_state(&shared.state, SessionState::Reconnecting).await;
                shared.reconnects.fetch_add(1, Ordering::SeqCst);

                let delay = reconnect_delay(
                    attempt,
                    shared.config.base_delay_ms,
                    shared.config.max_delay_ms,
                );
                info!("Reconnecting in {:?} (attempt {})", delay, attempt + 1);

                let timer = sleep(delay);
                tokio::pin!(timer);
                loop {
                    tokio::select! {
                        _ = &mut timer => {
                            attempt += 1;
                            break;
                        }
                        frame = frames_rx.recv(), if !frames_done => {
                            if frame.is_none() {
                                frames_done = true;
                            }
                        }
                        control = control_rx.recv() => {
                            match control {
                                Some(Control::Stop) | None => {
                                    set_state(&shared.state, SessionState::Closed).await;
                                    break 'session;
                                }
                                // Reconnect right away with the new voice
                                Some(Control::SwapVoice) => break,
                            }
                        }
                    }
                }
            }
        }
    }

    info!("Session loop finished");
}

/// A live voice conversation: microphone capture, a duplex session with the
/// speech service, scheduled playback of replies, and persisted memory.
pub struct VoiceSession {
    /// Session configuration
    config: SessionConfig,

    /// Where captured audio comes from
    capture_source: CaptureSource,

    /// Gapless scheduler for the service's audio replies
    playback: PlaybackScheduler,

    /// Output sink pulling from the scheduler
    output: Arc<Mutex<Box<dyn OutputBackend>>>,

    /// Bounded, persisted conversation memory
    memory: Arc<Mutex<MemoryStore>>,

    /// Voice persona for the next session open
    selected_voice: Arc<Mutex<String>>,

    /// Connection lifecycle, owned by the session loop
    state: Arc<Mutex<SessionState>>,

    /// Whether capture and playback are running
    is_streaming: Arc<AtomicBool>,

    /// Whether a session with the service is open
    is_connected: Arc<AtomicBool>,

    /// When this session object was created
    started_at: chrono::DateTime<Utc>,

    /// Active capture backend while streaming
    capture: Arc<Mutex<Option<Box<dyn CaptureBackend>>>>,

    /// Control channel into the session loop
    control_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>,

    /// Handle for the session loop task
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Audio frames sent to the service
    frames_sent: Arc<AtomicUsize>,

    /// Events received from the service
    events_received: Arc<AtomicUsize>,

    /// Transcript entries committed to memory
    turns_committed: Arc<AtomicUsize>,

    /// Times the loop entered the reconnect wait
    reconnects: Arc<AtomicUsize>,
}

impl VoiceSession {
    /// Create a new voice session. Conversation memory and the persisted
    /// voice preference are loaded up front; nothing connects until
    /// [`toggle`](Self::toggle) starts streaming.
    pub fn new(config: SessionConfig) -> Self {
        let memory = MemoryStore::load(&config.state_dir);

        let fallback = if VOICES.contains(&config.default_voice.as_str()) {
            config.default_voice.clone()
        } else {
            DEFAULT_VOICE.to_string()
        };
        let voice = memory
            .voice()
            .filter(|v| VOICES.contains(&v.as_str()))
            .unwrap_or(fallback);

        info!(
            "Voice session ready (voice={}, memory entries={})",
            voice,
            memory.len()
        );

        let playback = PlaybackScheduler::new(config.playback_sample_rate);
        let output: Box<dyn OutputBackend> = Box::new(OutputDevice::new(playback.clone()));

        Self {
            capture_source: CaptureSource::Microphone,
            playback,
            output: Arc::new(Mutex::new(output)),
            memory: Arc::new(Mutex::new(memory)),
            selected_voice: Arc::new(Mutex::new(voice)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            is_streaming: Arc::new(AtomicBool::new(false)),
            is_connected: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
            capture: Arc::new(Mutex::new(None)),
            control_tx: Arc::new(Mutex::new(None)),
            loop_handle: Arc::new(Mutex::new(None)),
            frames_sent: Arc::new(AtomicUsize::new(0)),
            events_received: Arc::new(AtomicUsize::new(0)),
            turns_committed: Arc::new(AtomicUsize::new(0)),
            reconnects: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Capture from somewhere other than the default microphone
    pub fn with_capture_source(mut self, source: CaptureSource) -> Self {
        self.capture_source = source;
        self
    }

    /// Render through something other than the default output device
    pub fn with_output_backend(mut self, output: Box<dyn OutputBackend>) -> Self {
        self.output = Arc::new(Mutex::new(output));
        self
    }

    /// Start streaming if stopped, stop if started.
    ///
    /// Starting acquires the capture and output devices and spawns the
    /// session loop; an acquisition failure leaves everything stopped.
    /// Stopping tears the session down and is safe to call repeatedly.
    pub async fn toggle(&self) -> VoiceResult<()> {
        if self.is_streaming.load(Ordering::SeqCst) {
            self.stop_streaming().await;
            Ok(())
        } else {
            self.start_streaming().await
        }
    }

    async fn start_streaming(&self) -> VoiceResult<()> {
        if self.is_streaming.load(Ordering::SeqCst) {
            warn!("Streaming already active");
            return Ok(());
        }

        info!("Starting voice streaming");

        let capture_config = CaptureConfig {
            sample_rate: self.config.capture_sample_rate,
            channels: self.config.channels,
            block_size: self.config.block_size,
        };
        let mut backend =
            CaptureBackendFactory::create(self.capture_source.clone(), capture_config)?;

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        backend.start(frames_tx).await?;

        {
            let mut output = self.output.lock().await;
            if let Err(e) = output.start().await {
                error!("Output device failed to start: {}", e);
                if let Err(stop_err) = backend.stop().await {
                    warn!("Failed to roll back capture: {}", stop_err);
                }
                return Err(e);
            }
        }

        {
            let mut capture = self.capture.lock().await;
            *capture = Some(backend);
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        {
            let mut tx = self.control_tx.lock().await;
            *tx = Some(control_tx);
        }

        self.is_streaming.store(true, Ordering::SeqCst);

        let shared = SessionShared {
            config: self.config.clone(),
            playback: self.playback.clone(),
            memory: Arc::clone(&self.memory),
            selected_voice: Arc::clone(&self.selected_voice),
            state: Arc::clone(&self.state),
            is_streaming: Arc::clone(&self.is_streaming),
            is_connected: Arc::clone(&self.is_connected),
            frames_sent: Arc::clone(&self.frames_sent),
            events_received: Arc::clone(&self.events_received),
            turns_committed: Arc::clone(&self.turns_committed),
            reconnects: Arc::clone(&self.reconnects),
        };

        let handle = tokio::spawn(run_loop(shared, frames_rx, control_rx));
        {
            let mut loop_handle = self.loop_handle.lock().await;
            *loop_handle = Some(handle);
        }

        Ok(())
    }

    async fn stop_streaming(&self) {
        info!("Stopping voice streaming");

        self.is_streaming.store(false, Ordering::SeqCst);

        // Capture goes first: the microphone is released and frame delivery
        // ends before anything else happens, whatever state the loop is in
        {
            let mut capture = self.capture.lock().await;
            if let Some(mut backend) = capture.take() {
                if let Err(e) = backend.stop().await {
                    warn!("Failed to stop capture: {}", e);
                }
            }
        }

        if let Some(tx) = self.control_tx.lock().await.take() {
            let _ = tx.send(Control::Stop);
        }

        // Wait for the loop so the session close and any pending reconnect
        // timer are gone before the speaker is released
        {
            let mut handle = self.loop_handle.lock().await;
            if let Some(task) = handle.take() {
                if let Err(e) = task.await {
                    error!("Session loop panicked: {}", e);
                }
            }
        }

        self.playback.cancel_all();
        self.output.lock().await.stop().await;
        self.is_connected.store(false, Ordering::SeqCst);

        info!("Voice streaming stopped");
    }

    /// Switch the agent's voice. Persisted immediately; if a session is
    /// open it is torn down and reopened with the new voice.
    pub async fn set_voice(&self, voice: &str) -> VoiceResult<()> {
        if !VOICES.contains(&voice) {
            return Err(VoiceError::Config(format!("unknown voice: {}", voice)));
        }

        {
            let mut selected = self.selected_voice.lock().await;
            if *selected == voice {
                return Ok(());
            }
            *selected = voice.to_string();
        }

        self.memory.lock().await.set_voice(voice);

        if self.is_connected.load(Ordering::SeqCst) {
            info!("Voice changed to {}; rebuilding session", voice);
            if let Some(tx) = self.control_tx.lock().await.as_ref() {
                let _ = tx.send(Control::SwapVoice);
            }
        } else {
            info!("Voice changed to {}", voice);
        }

        Ok(())
    }

    /// Voice persona for the next session open
    pub async fn voice(&self) -> String {
        self.selected_voice.lock().await.clone()
    }

    /// Set playback volume; ramped in, never stepped
    pub fn set_volume(&self, volume: f32) {
        self.playback.set_volume(volume);
    }

    /// Current playback volume target
    pub fn volume(&self) -> f32 {
        self.playback.volume()
    }

    /// Per-band amplitude of what is playing right now, for level meters
    pub fn amplitude_snapshot(&self) -> Vec<u8> {
        self.playback.amplitude_snapshot()
    }

    /// Whether a session with the speech service is open
    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    /// Whether capture and playback are running
    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::SeqCst)
    }

    /// Full conversation memory, oldest first
    pub async fn history(&self) -> Vec<ConversationEntry> {
        self.memory.lock().await.entries()
    }

    /// Current session statistics
    pub async fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let state = *self.state.lock().await;
        let memory_entries = self.memory.lock().await.len();

        SessionStats {
            state,
            is_connected: self.is_connected.load(Ordering::SeqCst),
            is_streaming: self.is_streaming.load(Ordering::SeqCst),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            events_received: self.events_received.load(Ordering::SeqCst),
            turns_committed: self.turns_committed.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            memory_entries,
            playback: self.playback.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_then_caps() {
        let delays: Vec<u64> = (0..6)
            .map(|attempt| reconnect_delay(attempt, 1000, 10000).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn reconnect_delay_survives_huge_attempt_counts() {
        assert_eq!(
            reconnect_delay(200, 1000, 10000),
            Duration::from_millis(10000)
        );
    }

    #[test]
    fn instruction_embeds_persona_and_context() {
        let text = build_instruction("Você é a Fala.", "[USUÁRIO]: oi");

        assert!(text.starts_with("Você é a Fala."));
        assert!(text.contains("MEMÓRIA DE CURTO PRAZO"));
        assert!(text.contains("[USUÁRIO]: oi"));
    }

    #[test]
    fn instruction_is_bare_persona_without_context() {
        assert_eq!(build_instruction("Você é a Fala.", ""), "Você é a Fala.");
    }
}
