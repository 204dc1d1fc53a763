//! Frame sources consumed by the avatar driver.

use crate::video::frame::{CanvasSize, Frame};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which frame sequence a source plays from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Gesture,
}

impl Mode {
    pub fn from_speaking(speaking: bool) -> Self {
        if speaking {
            Mode::Gesture
        } else {
            Mode::Idle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::Gesture => "gesture",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can hand the driver a frame for a mode.
pub trait FrameSource: Send + Sync {
    /// Next frame in `mode`, advancing that mode's playback position.
    fn next_frame(&self, mode: Mode) -> Frame;

    /// Frame shown at `timestamp` seconds into a looping playback. Does not move
    /// any playback position.
    fn frame_at_time(&self, timestamp: f64, mode: Mode) -> Frame;

    fn canvas(&self) -> CanvasSize;

    fn reset(&self) {}
}
