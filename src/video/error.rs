//! Error types for the frame pipeline.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failures while turning source videos into frame sets.
///
/// Only [`FrameError::NoUsableSource`] is fatal to a session: the per-mode
/// variants are absorbed by the frame store's fallback as long as the other mode
/// loaded.
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    #[error("source video unavailable: {}: {reason}", .path.display())]
    SourceUnavailable { path: PathBuf, reason: String },

    #[error("no frames extracted from {}", .path.display())]
    EmptyExtraction { path: PathBuf },

    #[error("decoding {} exceeded its {budget:?} budget", .path.display())]
    DecodeTimeout { path: PathBuf, budget: Duration },

    #[error("no usable source video (gesture: {}, idle: {})", .gesture.display(), .idle.display())]
    NoUsableSource { gesture: PathBuf, idle: PathBuf },
}

impl FrameError {
    pub fn unavailable(path: &Path, reason: impl Into<String>) -> Self {
        FrameError::SourceUnavailable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Machine-readable kind, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::SourceUnavailable { .. } => "source_unavailable",
            FrameError::EmptyExtraction { .. } => "empty_extraction",
            FrameError::DecodeTimeout { .. } => "decode_timeout",
            FrameError::NoUsableSource { .. } => "no_usable_source",
        }
    }
}
