//! # Frame Store
//!
//! Holds the normalized idle and gesture sequences for one source pair and plays
//! them back in a loop.
//!
//! ## Fallback:
//! If one source fails to load, its mode plays the other mode's sequence. The
//! store only fails to build when neither source yields frames, so a store that
//! exists always has two non-empty sequences.

use crate::video::cache::CacheKey;
use crate::video::decoder::VideoDecoder;
use crate::video::error::FrameError;
use crate::video::frame::{CanvasSize, Frame};
use crate::video::normalizer::FrameNormalizer;
use crate::video::source::{FrameSource, Mode};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Independent playback positions, one per mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayCursors {
    pub idle: usize,
    pub gesture: usize,
}

impl PlayCursors {
    fn slot_mut(&mut self, mode: Mode) -> &mut usize {
        match mode {
            Mode::Idle => &mut self.idle,
            Mode::Gesture => &mut self.gesture,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameStoreStats {
    pub key: String,
    pub idle_frames: usize,
    pub gesture_frames: usize,
    /// Mode playing the other mode's frames, if any.
    pub fallback: Option<Mode>,
    pub target_fps: u32,
    pub canvas: CanvasSize,
    pub cursors: PlayCursors,
}

pub struct FrameStore {
    key: CacheKey,
    idle: Arc<[Frame]>,
    gesture: Arc<[Frame]>,
    fallback: Option<Mode>,
    target_fps: u32,
    canvas: CanvasSize,
    cursors: Mutex<PlayCursors>,
}

impl FrameStore {
    /// Decode and normalize both sources of `key`.
    pub fn build(
        key: CacheKey,
        normalizer: &FrameNormalizer,
        decoder: &dyn VideoDecoder,
    ) -> Result<Self, FrameError> {
        let gesture = load_mode(Mode::Gesture, &key.gesture, normalizer, decoder);
        let idle = load_mode(Mode::Idle, &key.idle, normalizer, decoder);
        let options = normalizer.options();
        Self::assemble(key, idle, gesture, options.target_fps, options.canvas)
    }

    /// Build a store from already-normalized sequences. An empty sequence counts
    /// as a failed source.
    pub fn from_sequences(
        key: CacheKey,
        idle: Vec<Frame>,
        gesture: Vec<Frame>,
        target_fps: u32,
    ) -> Result<Self, FrameError> {
        let canvas = idle
            .first()
            .or_else(|| gesture.first())
            .map(Frame::canvas)
            .unwrap_or(CanvasSize::new(0, 0));
        let non_empty = |frames: Vec<Frame>, path: &Path| {
            if frames.is_empty() {
                Err(FrameError::EmptyExtraction {
                    path: path.to_path_buf(),
                })
            } else {
                Ok(frames)
            }
        };
        let idle = non_empty(idle, &key.idle);
        let gesture = non_empty(gesture, &key.gesture);
        Self::assemble(key, idle, gesture, target_fps, canvas)
    }

    fn assemble(
        key: CacheKey,
        idle: Result<Vec<Frame>, FrameError>,
        gesture: Result<Vec<Frame>, FrameError>,
        target_fps: u32,
        canvas: CanvasSize,
    ) -> Result<Self, FrameError> {
        let (idle, gesture, fallback): (Arc<[Frame]>, Arc<[Frame]>, _) = match (idle, gesture) {
            (Ok(idle), Ok(gesture)) => (idle.into(), gesture.into(), None),
            (Ok(idle), Err(err)) => {
                warn!(cache_key = %key, error = %err, "Gesture source unusable, playing idle frames instead");
                let idle: Arc<[Frame]> = idle.into();
                (Arc::clone(&idle), idle, Some(Mode::Gesture))
            }
            (Err(err), Ok(gesture)) => {
                warn!(cache_key = %key, error = %err, "Idle source unusable, playing gesture frames instead");
                let gesture: Arc<[Frame]> = gesture.into();
                (Arc::clone(&gesture), gesture, Some(Mode::Idle))
            }
            (Err(idle_err), Err(gesture_err)) => {
                error!(
                    cache_key = %key,
                    idle_error = %idle_err,
                    gesture_error = %gesture_err,
                    "No usable source video"
                );
                return Err(FrameError::NoUsableSource {
                    gesture: key.gesture.clone(),
                    idle: key.idle.clone(),
                });
            }
        };

        info!(
            cache_key = %key,
            idle_frames = idle.len(),
            gesture_frames = gesture.len(),
            fallback = ?fallback,
            "Frame store ready"
        );

        Ok(Self {
            key,
            idle,
            gesture,
            fallback,
            target_fps: target_fps.max(1),
            canvas,
            cursors: Mutex::new(PlayCursors::default()),
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    fn sequence(&self, mode: Mode) -> &[Frame] {
        match mode {
            Mode::Idle => &self.idle,
            Mode::Gesture => &self.gesture,
        }
    }

    pub fn frame_count(&self, mode: Mode) -> usize {
        self.sequence(mode).len()
    }

    pub fn fallback(&self) -> Option<Mode> {
        self.fallback
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn cursors(&self) -> PlayCursors {
        *self.cursors.lock()
    }

    pub fn stats(&self) -> FrameStoreStats {
        FrameStoreStats {
            key: self.key.to_string(),
            idle_frames: self.idle.len(),
            gesture_frames: self.gesture.len(),
            fallback: self.fallback,
            target_fps: self.target_fps,
            canvas: self.canvas,
            cursors: self.cursors(),
        }
    }
}

impl FrameSource for FrameStore {
    fn next_frame(&self, mode: Mode) -> Frame {
        let frames = self.sequence(mode);
        let mut cursors = self.cursors.lock();
        let slot = cursors.slot_mut(mode);
        let frame = frames[*slot].clone();
        *slot = (*slot + 1) % frames.len();
        frame
    }

    fn frame_at_time(&self, timestamp: f64, mode: Mode) -> Frame {
        let frames = self.sequence(mode);
        let len = frames.len() as i64;
        let index = if timestamp.is_finite() {
            ((timestamp * self.target_fps as f64).floor() as i64).rem_euclid(len)
        } else {
            0
        };
        frames[index as usize].clone()
    }

    fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    fn reset(&self) {
        *self.cursors.lock() = PlayCursors::default();
    }
}

fn load_mode(
    mode: Mode,
    path: &Path,
    normalizer: &FrameNormalizer,
    decoder: &dyn VideoDecoder,
) -> Result<Vec<Frame>, FrameError> {
    normalizer.extract(decoder, path).inspect_err(|err| {
        warn!(mode = %mode, path = %path.display(), error = %err, "Failed to load source video");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::normalizer::NormalizerOptions;
    use crate::video::testing::{
        frame_index, frame_tag, numbered_frames, SyntheticClip, SyntheticDecoder,
    };
    use proptest::prelude::*;

    const CANVAS: CanvasSize = CanvasSize::new(4, 4);
    const IDLE_TAG: u8 = 1;
    const GESTURE_TAG: u8 = 2;

    fn key() -> CacheKey {
        CacheKey::new("g.mp4", "i.mp4")
    }

    fn store(idle: usize, gesture: usize) -> FrameStore {
        FrameStore::from_sequences(
            key(),
            numbered_frames(idle, CANVAS, IDLE_TAG),
            numbered_frames(gesture, CANVAS, GESTURE_TAG),
            25,
        )
        .unwrap()
    }

    #[test]
    fn test_next_frame_cycles() {
        let store = store(3, 2);
        let idle: Vec<usize> = (0..7).map(|_| frame_index(&store.next_frame(Mode::Idle))).collect();
        assert_eq!(idle, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_cursors_are_independent() {
        let store = store(3, 2);
        store.next_frame(Mode::Idle);
        store.next_frame(Mode::Idle);

        let gesture = store.next_frame(Mode::Gesture);
        assert_eq!(frame_tag(&gesture), GESTURE_TAG);
        assert_eq!(frame_index(&gesture), 0);
        assert_eq!(store.cursors(), PlayCursors { idle: 2, gesture: 1 });

        assert_eq!(frame_index(&store.next_frame(Mode::Idle)), 2);
    }

    #[test]
    fn test_reset_rewinds_both_modes() {
        let store = store(3, 3);
        store.next_frame(Mode::Idle);
        store.next_frame(Mode::Gesture);
        store.reset();
        assert_eq!(store.cursors(), PlayCursors::default());
        assert_eq!(frame_index(&store.next_frame(Mode::Gesture)), 0);
    }

    #[test]
    fn test_frame_at_time() {
        let store = store(10, 10);
        assert_eq!(frame_index(&store.frame_at_time(0.0, Mode::Idle)), 0);
        assert_eq!(frame_index(&store.frame_at_time(0.2, Mode::Idle)), 5);
        // 25 fps * 1s = 25, 25 % 10 = 5
        assert_eq!(frame_index(&store.frame_at_time(1.0, Mode::Idle)), 5);
        assert_eq!(frame_index(&store.frame_at_time(-0.02, Mode::Idle)), 9);
        assert_eq!(frame_index(&store.frame_at_time(f64::NAN, Mode::Idle)), 0);
    }

    #[test]
    fn test_frame_at_time_leaves_cursors_alone() {
        let store = store(5, 5);
        store.next_frame(Mode::Idle);
        store.frame_at_time(3.3, Mode::Idle);
        store.frame_at_time(3.3, Mode::Gesture);
        assert_eq!(store.cursors(), PlayCursors { idle: 1, gesture: 0 });
    }

    #[test]
    fn test_single_frame_gesture_fallback() {
        let store = FrameStore::from_sequences(
            key(),
            numbered_frames(1, CANVAS, IDLE_TAG),
            Vec::new(),
            25,
        )
        .unwrap();

        assert_eq!(store.fallback(), Some(Mode::Gesture));
        for _ in 0..5 {
            let frame = store.next_frame(Mode::Gesture);
            assert_eq!(frame_tag(&frame), IDLE_TAG);
            assert_eq!(frame_index(&frame), 0);
        }
    }

    #[test]
    fn test_idle_fallback() {
        let store = FrameStore::from_sequences(
            key(),
            Vec::new(),
            numbered_frames(2, CANVAS, GESTURE_TAG),
            25,
        )
        .unwrap();
        assert_eq!(store.fallback(), Some(Mode::Idle));
        assert_eq!(frame_tag(&store.next_frame(Mode::Idle)), GESTURE_TAG);
    }

    #[test]
    fn test_no_usable_source() {
        let err = FrameStore::from_sequences(key(), Vec::new(), Vec::new(), 25)
            .err()
            .unwrap();
        assert!(matches!(err, FrameError::NoUsableSource { .. }));
    }

    #[test]
    fn test_build_with_missing_gesture_source() {
        let decoder = SyntheticDecoder::new()
            .with_clip("i.mp4", SyntheticClip::new(25.0, 6, 4, 4).tagged(IDLE_TAG));
        let normalizer = FrameNormalizer::new(NormalizerOptions {
            canvas: CANVAS,
            ..NormalizerOptions::default()
        });

        let store = FrameStore::build(key(), &normalizer, &decoder).unwrap();
        assert_eq!(store.frame_count(Mode::Gesture), 6);
        assert_eq!(store.fallback(), Some(Mode::Gesture));
        assert_eq!(store.canvas(), CANVAS);
        assert_eq!(frame_tag(&store.next_frame(Mode::Gesture)), IDLE_TAG);
    }

    #[test]
    fn test_build_with_no_sources() {
        let normalizer = FrameNormalizer::new(NormalizerOptions::default());
        let err = FrameStore::build(key(), &normalizer, &SyntheticDecoder::new())
            .err()
            .unwrap();
        assert!(matches!(err, FrameError::NoUsableSource { .. }));
    }

    proptest! {
        #[test]
        fn prop_next_frame_wraps(len in 1usize..40, calls in 0usize..200) {
            let store = store(len, 1);
            let mut last = 0;
            for _ in 0..=calls {
                last = frame_index(&store.next_frame(Mode::Idle));
            }
            prop_assert_eq!(last, calls % len);
        }

        #[test]
        fn prop_frame_at_time_is_pure(len in 1usize..40, t in -1000.0f64..1000.0) {
            let store = store(len, len);
            let first = store.frame_at_time(t, Mode::Gesture);
            let second = store.frame_at_time(t, Mode::Gesture);
            prop_assert!(first.shares_buffer(&second));
            prop_assert!(frame_index(&first) < len);
            prop_assert_eq!(store.cursors(), PlayCursors::default());
        }
    }
}
