//! # Avatar Module
//!
//! Drives a talking-head stream from a frame store and an audio feed.
//!
//! ## Key Components:
//! - **Features**: per-chunk audio record with PCM levels
//! - **Feed**: bounded, non-blocking audio queue
//! - **Transformer**: optional audio-conditioned frame rewrite
//! - **Driver**: the per-tick state machine (idle vs gesture, hangover, pts)
//! - **Session**: session lifecycle and the registry

pub mod driver;
pub mod features;
pub mod feed;
pub mod session;
pub mod transformer;

pub use driver::{AvatarTrackDriver, DriverConfig, OutputFrame};
pub use session::{AvatarSession, SessionRegistry, SessionState, StreamRequest};
pub use transformer::{FrameTransformer, TransformerKind};
