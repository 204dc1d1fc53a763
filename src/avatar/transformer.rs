//! # Frame Transformers
//!
//! Optional hook that rewrites a base frame given the audio features of the
//! current tick, e.g. a lip-sync model. The driver treats any error, panic or
//! call that outlasts one frame interval as "use the base frame".

use crate::avatar::features::AudioFeatures;
use crate::video::frame::Frame;
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub trait FrameTransformer: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the output frame for `base`. The result must keep the base
    /// frame's canvas size.
    fn transform(&self, base: &Frame, features: &AudioFeatures) -> Result<Frame>;
}

/// Which transformer new sessions get when they ask for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransformerKind {
    #[default]
    None,
    Passthrough,
}

impl TransformerKind {
    pub fn build(&self) -> Option<Arc<dyn FrameTransformer>> {
        match self {
            TransformerKind::None => None,
            TransformerKind::Passthrough => Some(Arc::new(ExclusiveTransformer::new(
                PassthroughTransformer,
            ))),
        }
    }
}

/// Returns the base frame untouched.
pub struct PassthroughTransformer;

impl FrameTransformer for PassthroughTransformer {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn transform(&self, base: &Frame, _features: &AudioFeatures) -> Result<Frame> {
        Ok(base.clone())
    }
}

/// Serializes calls into a transformer that must not run concurrently, such as
/// one model instance shared by several sessions.
pub struct ExclusiveTransformer<T> {
    inner: T,
    gate: Mutex<()>,
}

impl<T: FrameTransformer> ExclusiveTransformer<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }
}

impl<T: FrameTransformer> FrameTransformer for ExclusiveTransformer<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn transform(&self, base: &Frame, features: &AudioFeatures) -> Result<Frame> {
        let _guard = self.gate.lock();
        self.inner.transform(base, features)
    }
}
