//! Bounded audio queue between the audio producer and the frame clock.
//!
//! Pushes never block. When the queue is full the new chunk is dropped and
//! counted; the frame clock drains at most one chunk per tick.

use crate::avatar::features::AudioFeatures;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

pub const DEFAULT_QUEUE_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Dropped,
}

pub struct AudioFeed {
    tx: mpsc::Sender<AudioFeatures>,
    rx: Mutex<mpsc::Receiver<AudioFeatures>>,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl AudioFeed {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, features: AudioFeatures) -> PushOutcome {
        match self.tx.try_send(features) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Queued
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                let dropped_total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(capacity = self.capacity, dropped_total, "Audio queue full, dropping chunk");
                PushOutcome::Dropped
            }
        }
    }

    /// Take the oldest queued chunk, if any.
    pub fn try_pop(&self) -> Option<AudioFeatures> {
        self.rx.lock().try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_exactly_one() {
        let feed = AudioFeed::new(DEFAULT_QUEUE_DEPTH);

        let outcomes: Vec<PushOutcome> = (0..11u8)
            .map(|i| feed.push(AudioFeatures::from_chunk(&[i, 0])))
            .collect();

        assert!(outcomes[..10].iter().all(|o| *o == PushOutcome::Queued));
        assert_eq!(outcomes[10], PushOutcome::Dropped);
        assert_eq!(feed.pending(), 10);
        assert_eq!(feed.dropped(), 1);
        assert_eq!(feed.accepted(), 10);

        // The dropped chunk is the newest one
        let mut firsts = Vec::new();
        while let Some(features) = feed.try_pop() {
            firsts.push(features.payload[0]);
        }
        assert_eq!(firsts, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_fifo_and_empty() {
        let feed = AudioFeed::new(2);
        assert!(feed.try_pop().is_none());

        feed.push(AudioFeatures::from_chunk(b"ab"));
        feed.push(AudioFeatures::from_chunk(b"cd"));
        assert_eq!(&feed.try_pop().unwrap().payload[..], b"ab");
        assert_eq!(feed.pending(), 1);

        feed.push(AudioFeatures::from_chunk(b"ef"));
        assert_eq!(&feed.try_pop().unwrap().payload[..], b"cd");
        assert_eq!(&feed.try_pop().unwrap().payload[..], b"ef");
        assert_eq!(feed.dropped(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let feed = AudioFeed::new(0);
        assert_eq!(feed.capacity(), 1);
        assert_eq!(feed.push(AudioFeatures::from_chunk(b"x")), PushOutcome::Queued);
        assert_eq!(feed.push(AudioFeatures::from_chunk(b"y")), PushOutcome::Dropped);
    }
}
