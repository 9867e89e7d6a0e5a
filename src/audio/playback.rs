//! Gapless playback scheduling with barge-in cancellation
//!
//! Incoming chunks are decoded and scheduled on a sample-domain timeline:
//! each chunk starts at `max(cursor, now)` and advances the cursor by its
//! length. Chunks that arrive faster than real time therefore queue
//! back-to-back with no gap, and chunks that arrive after a stall resume
//! from "now" instead of catching up. `cancel_all` clears everything and
//! resets the cursor under a single lock, so a cancelled chunk can never
//! render afterwards.
//!
//! "Now" is the number of samples the output device has pulled through
//! [`PlaybackScheduler::render_block`]; tests drive the same path with a
//! scratch buffer instead of a device.

use crate::audio::codec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Bands in an amplitude snapshot
pub const AMPLITUDE_BANDS: usize = 128;

/// Rendered samples retained for the amplitude snapshot
const AMPLITUDE_WINDOW: usize = 1024;

/// Snapshot smoothing between reads: new = old * 0.5 + fresh * 0.5
const AMPLITUDE_SMOOTHING: f32 = 0.5;

/// One-pole volume ramp coefficient, roughly 8 ms to 63% at 24 kHz
const VOLUME_RAMP_ALPHA: f32 = 0.005;

/// One chunk on the schedule, in absolute sample positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledChunk {
    id: u64,
    start: u64,
    end: u64,
}

/// Pure sample-domain schedule: the cursor and the active set.
#[derive(Debug, Default)]
struct ScheduleState {
    /// End position of the last scheduled chunk; never moves backward
    /// except through `cancel_all`
    next_start: u64,
    active: Vec<ScheduledChunk>,
}

impl ScheduleState {
    fn schedule(&mut self, now: u64, id: u64, len: u64) -> u64 {
        let start = self.next_start.max(now);
        self.next_start = start + len;
        self.active.push(ScheduledChunk {
            id,
            start,
            end: start + len,
        });
        start
    }

    fn cancel_all(&mut self, now: u64) {
        self.active.clear();
        self.next_start = now;
    }

    fn retire(&mut self, id: u64) {
        self.active.retain(|chunk| chunk.id != id);
    }
}

/// Decoded samples waiting to be rendered
struct QueuedChunk {
    id: u64,
    start: u64,
    samples: Vec<f32>,
    pos: usize,
}

struct RenderState {
    schedule: ScheduleState,
    queue: VecDeque<QueuedChunk>,
    /// Samples pulled by the output device so far; the playback clock
    rendered: u64,
    volume_current: f32,
    volume_target: f32,
    window: VecDeque<f32>,
    bands: [f32; AMPLITUDE_BANDS],
    next_id: u64,
    chunks_enqueued: u64,
    chunks_dropped: u64,
}

/// Playback-side counters for stats reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Chunks currently playing or pending
    pub active_sources: usize,
    /// Schedule cursor position in samples
    pub cursor_samples: u64,
    /// Samples rendered to the device so far
    pub rendered_samples: u64,
    pub chunks_enqueued: u64,
    pub chunks_dropped: u64,
}

/// Handle to the shared playback state. Cheap to clone; the output device
/// callback holds one clone and the session another.
#[derive(Clone)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    shared: Arc<Mutex<RenderState>>,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            shared: Arc::new(Mutex::new(RenderState {
                schedule: ScheduleState::default(),
                queue: VecDeque::new(),
                rendered: 0,
                volume_current: 1.0,
                volume_target: 1.0,
                window: VecDeque::with_capacity(AMPLITUDE_WINDOW),
                bands: [0.0; AMPLITUDE_BANDS],
                next_id: 0,
                chunks_enqueued: 0,
                chunks_dropped: 0,
            })),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode a base64 PCM16 chunk and schedule it.
    ///
    /// Malformed and zero-length chunks are dropped with the cursor left
    /// untouched; playback of valid chunks continues unaffected.
    pub fn enqueue(&self, data: &str) {
        let samples = match codec::decode_chunk(data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                self.lock().chunks_dropped += 1;
                return;
            }
        };

        if samples.is_empty() {
            debug!("Ignoring empty audio chunk");
            return;
        }

        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;

        let now = state.rendered;
        let start = state.schedule.schedule(now, id, samples.len() as u64);

        debug!(
            "Scheduled chunk {} ({} samples) at sample {}",
            id,
            samples.len(),
            start
        );

        state.queue.push_back(QueuedChunk {
            id,
            start,
            samples,
            pos: 0,
        });
        state.chunks_enqueued += 1;
    }

    /// Barge-in: stop every playing and pending chunk and reset the cursor
    /// to "now". Takes effect before any chunk enqueued afterwards.
    pub fn cancel_all(&self) {
        let mut state = self.lock();
        let now = state.rendered;
        let discarded = state.queue.len();

        state.queue.clear();
        state.schedule.cancel_all(now);
        state.window.clear();
        state.bands = [0.0; AMPLITUDE_BANDS];

        if discarded > 0 {
            debug!("Cancelled {} queued chunks at sample {}", discarded, now);
        }
    }

    /// Set output gain in [0, 1]. Applied as a per-sample ramp, never a
    /// step, and buffered until the output device starts if set early.
    pub fn set_volume(&self, volume: f32) {
        self.lock().volume_target = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume_target
    }

    /// Fill `out` with the next block of output samples and advance the
    /// playback clock. Called by the output device callback; tests call it
    /// directly to step simulated time.
    pub fn render_block(&self, out: &mut [f32]) {
        let mut state = self.lock();

        for slot in out.iter_mut() {
            Self::pop_exhausted(&mut state);

            let pos = state.rendered;
            let mut sample = 0.0f32;

            if let Some(head) = state.queue.front_mut() {
                if pos >= head.start {
                    sample = head.samples[head.pos];
                    head.pos += 1;
                }
            }

            state.volume_current +=
                (state.volume_target - state.volume_current) * VOLUME_RAMP_ALPHA;
            let rendered = sample * state.volume_current;
            *slot = rendered;

            if state.window.len() == AMPLITUDE_WINDOW {
                state.window.pop_front();
            }
            state.window.push_back(rendered);

            state.rendered += 1;
        }

        Self::pop_exhausted(&mut state);
    }

    /// Non-blocking read of current output energy: 128 bands scaled to
    /// 0-255 and smoothed between reads. All zeros when nothing is playing
    /// or pending.
    pub fn amplitude_snapshot(&self) -> Vec<u8> {
        let mut state = self.lock();

        if state.schedule.active.is_empty() {
            state.bands = [0.0; AMPLITUDE_BANDS];
            return vec![0; AMPLITUDE_BANDS];
        }

        let fresh: Vec<f32> = {
            let window = state.window.make_contiguous();
            let segment = (window.len() / AMPLITUDE_BANDS).max(1);
            let mut bands = vec![0.0f32; AMPLITUDE_BANDS];

            for (i, chunk) in window.chunks(segment).take(AMPLITUDE_BANDS).enumerate() {
                let energy: f32 = chunk.iter().map(|s| s * s).sum::<f32>() / chunk.len() as f32;
                // sqrt of RMS lifts quiet speech into the visible range
                bands[i] = (energy.sqrt().sqrt() * 255.0).min(255.0);
            }

            bands
        };

        let mut out = Vec::with_capacity(AMPLITUDE_BANDS);
        for i in 0..AMPLITUDE_BANDS {
            state.bands[i] =
                state.bands[i] * AMPLITUDE_SMOOTHING + fresh[i] * (1.0 - AMPLITUDE_SMOOTHING);
            out.push(state.bands[i] as u8);
        }

        out
    }

    pub fn stats(&self) -> PlaybackStats {
        let state = self.lock();
        PlaybackStats {
            active_sources: state.schedule.active.len(),
            cursor_samples: state.schedule.next_start,
            rendered_samples: state.rendered,
            chunks_enqueued: state.chunks_enqueued,
            chunks_dropped: state.chunks_dropped,
        }
    }

    fn pop_exhausted(state: &mut RenderState) {
        loop {
            let done = match state.queue.front() {
                Some(head) => head.pos >= head.samples.len(),
                None => break,
            };
            if !done {
                break;
            }
            if let Some(finished) = state.queue.pop_front() {
                state.schedule.retire(finished.id);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RenderState> {
        // render and control paths hold the lock only for short,
        // allocation-free sections; poisoning would mean a panic mid-render
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_schedule_back_to_back() {
        let mut schedule = ScheduleState::default();

        let s1 = schedule.schedule(0, 0, 2400);
        let s2 = schedule.schedule(0, 1, 1200);
        let s3 = schedule.schedule(100, 2, 600);

        assert_eq!(s1, 0);
        assert_eq!(s2, 2400, "second chunk starts where the first ends");
        assert_eq!(s3, 3600, "cursor wins while it is ahead of now");
        assert_eq!(schedule.next_start, 4200);
        assert_eq!(schedule.active.len(), 3);
    }

    #[test]
    fn stalled_schedule_resumes_from_now() {
        let mut schedule = ScheduleState::default();

        schedule.schedule(0, 0, 1000);
        // device clock has moved past the cursor: resume at now, no catch-up
        let start = schedule.schedule(5000, 1, 1000);

        assert_eq!(start, 5000);
        assert_eq!(schedule.next_start, 6000);
    }

    #[test]
    fn cancel_resets_cursor_and_empties_active_set() {
        let mut schedule = ScheduleState::default();

        schedule.schedule(0, 0, 2400);
        schedule.schedule(0, 1, 2400);
        schedule.cancel_all(777);

        assert!(schedule.active.is_empty());
        assert_eq!(schedule.next_start, 777);

        let start = schedule.schedule(777, 2, 100);
        assert_eq!(start, 777, "post-cancel chunk starts at the reset cursor");
    }

    #[test]
    fn retire_removes_only_the_finished_chunk() {
        let mut schedule = ScheduleState::default();

        schedule.schedule(0, 0, 100);
        schedule.schedule(0, 1, 100);
        schedule.retire(0);

        assert_eq!(schedule.active.len(), 1);
        assert_eq!(schedule.active[0].id, 1);
    }
}
