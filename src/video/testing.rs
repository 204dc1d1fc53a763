//! In-memory decoder and frame helpers for tests.

use crate::video::decoder::{DecodedVideo, SourceVideo, VideoDecoder};
use crate::video::error::FrameError;
use crate::video::frame::{CanvasSize, Frame};
use crate::video::source::{FrameSource, Mode};
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// A fake source video. Frame `i` is a solid image whose first two channels
/// encode `i`, so tests can tell which source frame survived extraction.
#[derive(Debug, Clone)]
pub struct SyntheticClip {
    pub fps: f64,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub tag: u8,
    pub fail_at: Option<usize>,
    pub delay: Option<Duration>,
}

impl SyntheticClip {
    pub fn new(fps: f64, frames: usize, width: u32, height: u32) -> Self {
        Self {
            fps,
            frames,
            width,
            height,
            tag: 0,
            fail_at: None,
            delay: None,
        }
    }

    pub fn tagged(mut self, tag: u8) -> Self {
        self.tag = tag;
        self
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
pub struct SyntheticDecoder {
    clips: HashMap<PathBuf, SyntheticClip>,
    opened: AtomicUsize,
}

impl SyntheticDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(mut self, path: impl Into<PathBuf>, clip: SyntheticClip) -> Self {
        self.clips.insert(path.into(), clip);
        self
    }

    /// Number of successful `open` calls.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn open(
        &self,
        path: &Path,
        _deadline: Option<Instant>,
    ) -> Result<Box<dyn DecodedVideo>, FrameError> {
        let clip = self
            .clips
            .get(path)
            .cloned()
            .ok_or_else(|| FrameError::unavailable(path, "file not found"))?;
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SyntheticVideo {
            source: SourceVideo {
                path: path.to_path_buf(),
                fps: clip.fps,
                frame_count: Some(clip.frames as u64),
                width: clip.width,
                height: clip.height,
            },
            clip,
            index: 0,
        }))
    }
}

struct SyntheticVideo {
    source: SourceVideo,
    clip: SyntheticClip,
    index: usize,
}

impl DecodedVideo for SyntheticVideo {
    fn source(&self) -> &SourceVideo {
        &self.source
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError> {
        if self.clip.fail_at == Some(self.index) {
            return Err(FrameError::unavailable(&self.source.path, "corrupt packet"));
        }
        if self.index >= self.clip.frames {
            return Ok(None);
        }
        if let Some(delay) = self.clip.delay {
            thread::sleep(delay);
        }

        let image = RgbImage::from_pixel(
            self.clip.width,
            self.clip.height,
            Rgb(encode_index(self.index, self.clip.tag)),
        );
        self.index += 1;
        Ok(Some(image))
    }
}

fn encode_index(index: usize, tag: u8) -> [u8; 3] {
    [(index % 256) as u8, (index / 256) as u8, tag]
}

/// Source index encoded in a synthetic frame.
pub fn frame_index(frame: &Frame) -> usize {
    let [low, high, _] = frame.pixel(0, 0).unwrap_or_default();
    low as usize + high as usize * 256
}

/// Tag channel of a synthetic frame.
pub fn frame_tag(frame: &Frame) -> u8 {
    frame.pixel(0, 0).map(|[_, _, tag]| tag).unwrap_or_default()
}

/// `count` solid frames numbered from zero.
pub fn numbered_frames(count: usize, canvas: CanvasSize, tag: u8) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            Frame::from_rgb_image(RgbImage::from_pixel(
                canvas.width,
                canvas.height,
                Rgb(encode_index(i, tag)),
            ))
        })
        .collect()
}

/// Serves one frame forever, in both modes.
pub struct StillFrameSource {
    frame: Frame,
}

impl StillFrameSource {
    pub fn new(frame: Frame) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillFrameSource {
    fn next_frame(&self, _mode: Mode) -> Frame {
        self.frame.clone()
    }

    fn frame_at_time(&self, _timestamp: f64, _mode: Mode) -> Frame {
        self.frame.clone()
    }

    fn canvas(&self) -> CanvasSize {
        self.frame.canvas()
    }
}
