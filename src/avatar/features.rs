//! # Audio Features
//!
//! Turns a raw audio chunk into the features record the avatar driver queues.
//! The payload is kept as-is; when it parses as 16-bit little-endian PCM, level
//! statistics are attached for transformers and diagnostics.

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;

/// Level statistics of a PCM chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PcmLevels {
    pub samples: usize,
    /// Root mean square, normalized to `0.0..=1.0`.
    pub rms: f32,
    /// Largest absolute sample value.
    pub peak: u16,
}

/// One queued audio chunk.
#[derive(Debug, Clone)]
pub struct AudioFeatures {
    pub captured_at: DateTime<Utc>,
    pub payload: Arc<[u8]>,
    pub levels: Option<PcmLevels>,
}

impl AudioFeatures {
    pub fn from_chunk(chunk: &[u8]) -> Self {
        Self {
            captured_at: Utc::now(),
            payload: Arc::from(chunk),
            levels: pcm_levels(chunk),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Statistics of `data` read as 16-bit little-endian PCM. `None` when the chunk
/// is empty or has an odd length.
pub fn pcm_levels(data: &[u8]) -> Option<PcmLevels> {
    if data.is_empty() || data.len() % 2 != 0 {
        return None;
    }

    let mut cursor = Cursor::new(data);
    let mut samples = 0usize;
    let mut sum_squares = 0.0_f64;
    let mut peak = 0u16;

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples += 1;
        sum_squares += (sample as f64) * (sample as f64);
        peak = peak.max(sample.unsigned_abs());
    }

    let rms = (sum_squares / samples as f64).sqrt() / 32768.0;
    Some(PcmLevels {
        samples,
        rms: rms as f32,
        peak,
    })
}
