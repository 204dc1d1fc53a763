//! # Video Module
//!
//! Everything between a source video file on disk and a looping, canvas-sized
//! frame sequence:
//!
//! - **decoder / ffmpeg**: pull RGB frames out of a container
//! - **normalizer**: decimate to the target rate and letterbox to the canvas
//! - **store**: hold idle and gesture sequences and play them back
//! - **cache**: share stores between sessions using the same source pair

pub mod cache;
pub mod decoder;
pub mod error;
pub mod ffmpeg;
pub mod frame;
pub mod normalizer;
pub mod source;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use cache::{CacheKey, FrameSetCache};
pub use decoder::VideoDecoder;
pub use error::FrameError;
pub use ffmpeg::FfmpegDecoder;
pub use frame::{CanvasSize, Frame};
pub use normalizer::NormalizerOptions;
pub use source::{FrameSource, Mode};
pub use store::FrameStore;
