//! # Video Decoding Seam
//!
//! The normalizer never talks to a codec directly. It asks a [`VideoDecoder`] to
//! open a path and then pulls decoded RGB images one at a time, in presentation
//! order, until the stream ends.
//!
//! ## Implementations:
//! - **FfmpegDecoder** (`video::ffmpeg`): production backend
//! - **SyntheticDecoder** (`video::testing`): in-memory clips for tests

use crate::video::error::FrameError;
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// What the decoder learned about a source when it opened it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceVideo {
    pub path: PathBuf,
    /// Decoded frame rate; `0.0` when the container does not report one.
    pub fps: f64,
    /// Frame count reported by the container, if any.
    pub frame_count: Option<u64>,
    pub width: u32,
    pub height: u32,
}

/// An opened source, yielding frames sequentially.
pub trait DecodedVideo: Send {
    fn source(&self) -> &SourceVideo;

    /// Next decoded frame in the source's native size, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, FrameError>;
}

/// Opens source videos for sequential decoding.
pub trait VideoDecoder: Send + Sync {
    /// Open `path`. When `deadline` is set the backend must stop producing frames
    /// once it passes, even if a read is blocked.
    fn open(
        &self,
        path: &Path,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn DecodedVideo>, FrameError>;
}
