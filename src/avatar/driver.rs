//! # Avatar Track Driver
//!
//! Produces one output frame per tick of the session's frame clock.
//!
//! ## Per tick:
//! 1. Drain at most one queued audio chunk; if there was one, mark "audio seen now"
//! 2. Speaking = audio seen within the hangover window
//! 3. Pull the next base frame from the source in the matching mode
//! 4. With audio and a transformer, transform the base frame off the async
//!    runtime within one frame interval; any failure or overrun falls back to
//!    the base frame
//! 5. Stamp the frame with a 90 kHz presentation timestamp
//!
//! A tick always yields a frame. If the source itself fails, the previous output
//! (or a neutral frame captured at startup) is repeated.

use crate::avatar::features::AudioFeatures;
use crate::avatar::feed::{AudioFeed, PushOutcome, DEFAULT_QUEUE_DEPTH};
use crate::avatar::transformer::FrameTransformer;
use crate::video::frame::Frame;
use crate::video::source::{FrameSource, Mode};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// RTP-style video clock rate.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

pub const DEFAULT_HANGOVER: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub fps: u32,
    pub hangover: Duration,
    pub audio_queue_depth: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            hangover: DEFAULT_HANGOVER,
            audio_queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl DriverConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// A frame ready for the transport.
#[derive(Debug, Clone)]
pub struct OutputFrame {
    pub frame: Frame,
    /// Presentation timestamp in units of `1 / time_base` seconds.
    pub pts: u64,
    pub time_base: u32,
    pub speaking: bool,
    pub transformed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverStats {
    pub fps: u32,
    pub hangover_ms: u64,
    pub ticks: u64,
    pub speaking: bool,
    pub audio_pending: usize,
    pub audio_accepted: u64,
    pub audio_dropped: u64,
    pub transformer: Option<String>,
    pub transform_failures: u64,
    pub tick_failures: u64,
}

#[derive(Default)]
struct DriverState {
    last_audio: Option<Instant>,
    last_frame: Option<Frame>,
    ticks: u64,
}

pub struct AvatarTrackDriver {
    source: Arc<dyn FrameSource>,
    transformer: Option<Arc<dyn FrameTransformer>>,
    feed: AudioFeed,
    config: DriverConfig,
    neutral: Frame,
    state: Mutex<DriverState>,
    transform_failures: AtomicU64,
    tick_failures: AtomicU64,
}

impl AvatarTrackDriver {
    pub fn new(
        source: Arc<dyn FrameSource>,
        transformer: Option<Arc<dyn FrameTransformer>>,
        config: DriverConfig,
    ) -> Self {
        let neutral = neutral_frame(source.as_ref());
        Self {
            feed: AudioFeed::new(config.audio_queue_depth),
            source,
            transformer,
            config,
            neutral,
            state: Mutex::new(DriverState::default()),
            transform_failures: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Queue an audio chunk without blocking. Full queues drop the chunk.
    pub fn add_audio(&self, chunk: &[u8]) -> PushOutcome {
        self.feed.push(AudioFeatures::from_chunk(chunk))
    }

    pub fn audio_dropped(&self) -> u64 {
        self.feed.dropped()
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking_at(Instant::now())
    }

    pub fn is_speaking_at(&self, now: Instant) -> bool {
        let last_audio = self.state.lock().last_audio;
        speaking_since(last_audio, now, self.config.hangover)
    }

    pub async fn produce_frame(&self) -> OutputFrame {
        self.produce_frame_at(Instant::now()).await
    }

    /// Produce the frame for the tick happening at `now`.
    pub async fn produce_frame_at(&self, now: Instant) -> OutputFrame {
        let features = self.feed.try_pop();

        let (pts, speaking) = {
            let mut state = self.state.lock();
            let pts = state.ticks * VIDEO_CLOCK_RATE as u64 / self.config.fps.max(1) as u64;
            state.ticks += 1;
            if features.is_some() {
                state.last_audio = Some(now);
            }
            (pts, speaking_since(state.last_audio, now, self.config.hangover))
        };

        let mode = Mode::from_speaking(speaking);
        let base = match catch_unwind(AssertUnwindSafe(|| self.source.next_frame(mode))) {
            Ok(frame) => frame,
            Err(_) => return self.repeat_last(pts, speaking),
        };

        let (frame, transformed) = match (features, &self.transformer) {
            (Some(features), Some(transformer)) => {
                self.transform(Arc::clone(transformer), base, features).await
            }
            _ => (base, false),
        };

        self.state.lock().last_frame = Some(frame.clone());
        OutputFrame {
            frame,
            pts,
            time_base: VIDEO_CLOCK_RATE,
            speaking,
            transformed,
        }
    }

    async fn transform(
        &self,
        transformer: Arc<dyn FrameTransformer>,
        base: Frame,
        features: AudioFeatures,
    ) -> (Frame, bool) {
        let input = base.clone();
        let budget = self.config.frame_interval();
        let task = tokio::task::spawn_blocking(move || transformer.transform(&input, &features));

        let result = match tokio::time::timeout(budget, task).await {
            Ok(result) => result,
            Err(_) => {
                // The blocking task keeps running detached; its result is discarded.
                self.transform_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    budget_ms = budget.as_millis() as u64,
                    "Frame transform missed the tick, using base frame"
                );
                return (base, false);
            }
        };

        match result {
            Ok(Ok(frame)) if frame.canvas() == base.canvas() => (frame, true),
            Ok(Ok(frame)) => {
                self.transform_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    expected = %base.canvas(),
                    got = %frame.canvas(),
                    "Transformer changed the frame size, using base frame"
                );
                (base, false)
            }
            Ok(Err(err)) => {
                self.transform_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Frame transform failed, using base frame");
                (base, false)
            }
            Err(join_error) => {
                self.transform_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %join_error, "Frame transformer aborted, using base frame");
                (base, false)
            }
        }
    }

    fn repeat_last(&self, pts: u64, speaking: bool) -> OutputFrame {
        let failures = self.tick_failures.fetch_add(1, Ordering::Relaxed) + 1;
        error!(pts, failures, "Frame source failed, repeating last frame");

        let frame = self
            .state
            .lock()
            .last_frame
            .clone()
            .unwrap_or_else(|| self.neutral.clone());
        OutputFrame {
            frame,
            pts,
            time_base: VIDEO_CLOCK_RATE,
            speaking,
            transformed: false,
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> DriverStats {
        let (ticks, last_audio) = {
            let state = self.state.lock();
            (state.ticks, state.last_audio)
        };
        DriverStats {
            fps: self.config.fps,
            hangover_ms: self.config.hangover.as_millis() as u64,
            ticks,
            speaking: speaking_since(last_audio, now, self.config.hangover),
            audio_pending: self.feed.pending(),
            audio_accepted: self.feed.accepted(),
            audio_dropped: self.feed.dropped(),
            transformer: self.transformer.as_ref().map(|t| t.name().to_string()),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
        }
    }
}

fn speaking_since(last_audio: Option<Instant>, now: Instant, hangover: Duration) -> bool {
    match last_audio {
        Some(last) => now.saturating_duration_since(last) < hangover,
        None => false,
    }
}

/// Idle frame at t=0, or black if the source cannot produce one.
fn neutral_frame(source: &dyn FrameSource) -> Frame {
    catch_unwind(AssertUnwindSafe(|| source.frame_at_time(0.0, Mode::Idle))).unwrap_or_else(|_| {
        warn!("Frame source failed at startup, using a black neutral frame");
        Frame::blank(source.canvas())
    })
}
