//! # Frame Normalizer
//!
//! Turns one source video into a finite sequence of canvas-sized frames:
//!
//! 1. **Decimation**: keep source frames at the target rate. With
//!    `interval = source_fps / target_fps` (1.0 when the source rate is unknown),
//!    frame `n` is kept when `n >= next`, after which `next += interval`.
//! 2. **Letterbox**: scale uniformly to fit the canvas and center the result on a
//!    black background.
//! 3. **Cap**: stop after `extraction_cap` kept frames.
//! 4. **Budget**: stop once the decode deadline passes. Frames kept so far
//!    survive, an empty result is an error.

use crate::video::decoder::VideoDecoder;
use crate::video::error::FrameError;
use crate::video::frame::{CanvasSize, Frame};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_TARGET_FPS: u32 = 25;
pub const DEFAULT_EXTRACTION_CAP: usize = 300;
pub const DEFAULT_CANVAS: CanvasSize = CanvasSize::new(512, 512);
pub const DEFAULT_DECODE_BUDGET: Duration = Duration::from_secs(60);

/// Extraction parameters. Part of a frame set's identity only in that the
/// first set built for a key wins.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerOptions {
    pub canvas: CanvasSize,
    pub target_fps: u32,
    pub extraction_cap: usize,
    pub decode_budget: Option<Duration>,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            canvas: DEFAULT_CANVAS,
            target_fps: DEFAULT_TARGET_FPS,
            extraction_cap: DEFAULT_EXTRACTION_CAP,
            decode_budget: Some(DEFAULT_DECODE_BUDGET),
        }
    }
}

/// Where a scaled source lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub struct FrameNormalizer {
    options: NormalizerOptions,
}

impl FrameNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NormalizerOptions {
        &self.options
    }

    /// Decode `path` and return its normalized frames in presentation order.
    pub fn extract(
        &self,
        decoder: &dyn VideoDecoder,
        path: &Path,
    ) -> Result<Vec<Frame>, FrameError> {
        let started = Instant::now();
        let deadline = self.options.decode_budget.map(|budget| started + budget);

        let mut video = decoder.open(path, deadline)?;
        let source = video.source().clone();
        let interval = sampling_interval(source.fps, self.options.target_fps);

        info!(
            path = %path.display(),
            source_fps = source.fps,
            frame_count = ?source.frame_count,
            width = source.width,
            height = source.height,
            interval,
            "Extracting frames"
        );

        let mut frames = Vec::new();
        let mut decoded: u64 = 0;
        let mut next_kept = 0.0_f64;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    let budget = self.options.decode_budget.unwrap_or_default();
                    if frames.is_empty() {
                        return Err(FrameError::DecodeTimeout {
                            path: path.to_path_buf(),
                            budget,
                        });
                    }
                    warn!(
                        path = %path.display(),
                        kept = frames.len(),
                        ?budget,
                        "Decode budget exhausted, keeping partial sequence"
                    );
                    break;
                }
            }

            let image = match video.next_frame() {
                Ok(Some(image)) => image,
                Ok(None) => break,
                Err(err) if frames.is_empty() => return Err(err),
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        kept = frames.len(),
                        error = %err,
                        "Decoding stopped early, keeping partial sequence"
                    );
                    break;
                }
            };

            if decoded as f64 >= next_kept {
                frames.push(letterbox(&image, self.options.canvas));
                next_kept += interval;

                if frames.len() >= self.options.extraction_cap {
                    debug!(path = %path.display(), cap = self.options.extraction_cap, "Extraction cap reached");
                    break;
                }
            }
            decoded += 1;
        }

        if frames.is_empty() {
            return Err(FrameError::EmptyExtraction {
                path: path.to_path_buf(),
            });
        }

        info!(
            path = %path.display(),
            kept = frames.len(),
            decoded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Frames extracted"
        );
        Ok(frames)
    }
}

/// Source frames per kept frame. Falls back to 1.0 (keep every frame) when either
/// rate is unusable.
pub fn sampling_interval(source_fps: f64, target_fps: u32) -> f64 {
    if target_fps > 0 && source_fps.is_finite() && source_fps > 0.0 {
        source_fps / target_fps as f64
    } else {
        1.0
    }
}

/// Uniform fit of a `src_width x src_height` image into `canvas`, centered.
/// Scaled dimensions are floored and never drop below one pixel.
pub fn fit_within(src_width: u32, src_height: u32, canvas: CanvasSize) -> Placement {
    let (sw, sh) = (src_width.max(1) as u64, src_height.max(1) as u64);
    let (cw, ch) = (canvas.width as u64, canvas.height as u64);

    // Compare cw/sw against ch/sh without floating point
    let (width, height) = if cw * sh <= ch * sw {
        (cw, sh * cw / sw)
    } else {
        (sw * ch / sh, ch)
    };
    let width = width.clamp(1, cw.max(1)) as u32;
    let height = height.clamp(1, ch.max(1)) as u32;

    Placement {
        x: canvas.width.saturating_sub(width) / 2,
        y: canvas.height.saturating_sub(height) / 2,
        width,
        height,
    }
}

/// Scale `image` into `canvas` preserving aspect ratio, padding with black.
pub fn letterbox(image: &RgbImage, canvas: CanvasSize) -> Frame {
    let placement = fit_within(image.width(), image.height(), canvas);
    let mut output = RgbImage::new(canvas.width, canvas.height);

    if image.dimensions() == (placement.width, placement.height) {
        imageops::replace(&mut output, image, placement.x as i64, placement.y as i64);
    } else {
        let resized = imageops::resize(
            image,
            placement.width,
            placement.height,
            FilterType::Lanczos3,
        );
        imageops::replace(&mut output, &resized, placement.x as i64, placement.y as i64);
    }

    Frame::from_rgb_image(output)
}
