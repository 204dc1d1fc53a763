//! # Frames
//!
//! The boundary representation of a video frame: a fixed-size pixel buffer in a
//! single channel order. Frames are immutable once produced, so a clone only bumps
//! a reference count and every holder observes the same pixels.
//!
//! ## Layout:
//! - **Channel order**: RGB, 8 bits per channel (`rgb24`)
//! - **Row-major**: `width * 3` bytes per row, no padding
//! - **Size**: always exactly the canvas the frame set was normalized to

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Bytes per pixel in the output channel order.
pub const BYTES_PER_PIXEL: usize = 3;

/// Channel order of every frame leaving the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb24,
}

impl ChannelOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelOrder::Rgb24 => "rgb24",
        }
    }
}

/// Width and height of the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of bytes a frame of this size occupies.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl fmt::Display for CanvasSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single immutable video frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap a decoded RGB image without copying its pixels.
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: Arc::from(image.into_raw()),
        }
    }

    /// Build a frame from raw `rgb24` bytes. Returns `None` when the buffer length
    /// does not match the canvas.
    pub fn from_raw(canvas: CanvasSize, data: Vec<u8>) -> Option<Self> {
        if data.len() != canvas.byte_len() {
            return None;
        }
        Some(Self {
            width: canvas.width,
            height: canvas.height,
            data: Arc::from(data),
        })
    }

    /// An all-black frame.
    pub fn blank(canvas: CanvasSize) -> Self {
        Self {
            width: canvas.width,
            height: canvas.height,
            data: Arc::from(vec![0u8; canvas.byte_len()]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn canvas(&self) -> CanvasSize {
        CanvasSize::new(self.width, self.height)
    }

    pub fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgb24
    }

    /// Raw pixel bytes in [`ChannelOrder::Rgb24`].
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at `(x, y)`, or `None` outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Some([self.data[offset], self.data[offset + 1], self.data[offset + 2]])
    }

    /// True when both frames point at the same pixel buffer.
    pub fn shares_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_from_rgb_image_keeps_layout() {
        let mut image = RgbImage::new(4, 2);
        image.put_pixel(3, 1, Rgb([10, 20, 30]));

        let frame = Frame::from_rgb_image(image);
        assert_eq!(frame.canvas(), CanvasSize::new(4, 2));
        assert_eq!(frame.data().len(), 4 * 2 * 3);
        assert_eq!(frame.pixel(3, 1), Some([10, 20, 30]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(4, 0), None);
    }

    #[test]
    fn test_from_raw_rejects_wrong_length() {
        let canvas = CanvasSize::new(2, 2);
        assert!(Frame::from_raw(canvas, vec![0; 11]).is_none());
        assert!(Frame::from_raw(canvas, vec![0; 12]).is_some());
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = Frame::blank(CanvasSize::new(8, 8));
        let copy = frame.clone();
        assert!(frame.shares_buffer(&copy));
        assert_eq!(frame, copy);
        assert!(!frame.shares_buffer(&Frame::blank(CanvasSize::new(8, 8))));
    }
}
