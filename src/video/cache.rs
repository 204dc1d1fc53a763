//! # Frame Set Cache
//!
//! Process-wide memoization of frame stores, keyed by the source pair. Building a
//! store decodes two whole videos, so sessions that ask for the same pair share
//! one store and only the first caller pays for extraction.
//!
//! ## Concurrency:
//! One async build lock serializes construction. Concurrent requests for the same
//! key wait for the first build and then receive the same store; requests for
//! other keys wait too. Construction runs on the blocking pool so the lock holder
//! never stalls the async runtime.
//!
//! The entry map sits behind its own read-write lock, taken only for lookups and
//! the final insert, so introspection never waits on a build.
//!
//! ## Options:
//! The first build for a key fixes its canvas, frame rate and cap. Later requests
//! with different options receive the cached store unchanged.

use crate::video::decoder::VideoDecoder;
use crate::video::error::FrameError;
use crate::video::normalizer::{FrameNormalizer, NormalizerOptions};
use crate::video::store::{FrameStore, FrameStoreStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Identity of a frame set: the gesture and idle source paths, as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub gesture: PathBuf,
    pub idle: PathBuf,
}

impl CacheKey {
    pub fn new(gesture: impl Into<PathBuf>, idle: impl Into<PathBuf>) -> Self {
        Self {
            gesture: gesture.into(),
            idle: idle.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.gesture.display(), self.idle.display())
    }
}

struct CacheEntry {
    store: Arc<FrameStore>,
    options: NormalizerOptions,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStats {
    pub created_at: DateTime<Utc>,
    /// Sessions and handlers currently holding the store, besides the cache.
    pub holders: usize,
    #[serde(flatten)]
    pub store: FrameStoreStats,
}

pub struct FrameSetCache {
    decoder: Arc<dyn VideoDecoder>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    build_lock: Mutex<()>,
}

impl FrameSetCache {
    pub fn new(decoder: Arc<dyn VideoDecoder>) -> Self {
        Self {
            decoder,
            entries: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    fn lookup(&self, key: &CacheKey, options: &NormalizerOptions) -> Option<Arc<FrameStore>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.options != *options {
            debug!(cache_key = %key, "Cached frame set keeps its original options");
        } else {
            debug!(cache_key = %key, "Frame set cache hit");
        }
        Some(Arc::clone(&entry.store))
    }

    /// Return the store for `(gesture, idle)`, building it on first request.
    pub async fn get_or_create(
        &self,
        gesture: impl Into<PathBuf>,
        idle: impl Into<PathBuf>,
        options: &NormalizerOptions,
    ) -> Result<Arc<FrameStore>, FrameError> {
        let key = CacheKey::new(gesture, idle);
        if let Some(store) = self.lookup(&key, options) {
            return Ok(store);
        }

        let _build = self.build_lock.lock().await;
        // Another caller may have built this key while we waited
        if let Some(store) = self.lookup(&key, options) {
            return Ok(store);
        }

        info!(cache_key = %key, "Building frame set");
        let decoder = Arc::clone(&self.decoder);
        let build_key = key.clone();
        let build_options = options.clone();

        let built = tokio::task::spawn_blocking(move || {
            let normalizer = FrameNormalizer::new(build_options);
            FrameStore::build(build_key, &normalizer, decoder.as_ref())
        })
        .await;

        let store = match built {
            Ok(result) => Arc::new(result?),
            Err(join_error) => {
                error!(cache_key = %key, error = %join_error, "Frame set construction aborted");
                return Err(FrameError::NoUsableSource {
                    gesture: key.gesture,
                    idle: key.idle,
                });
            }
        };

        self.entries.write().insert(
            key,
            CacheEntry {
                store: Arc::clone(&store),
                options: options.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(store)
    }

    /// Drop every cached store. Sessions keep the stores they already hold.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        info!(removed, "Frame set cache cleared");
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut keys: Vec<String> = entries.keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<CacheEntryStats> {
        let entries = self.entries.read();
        let mut stats: Vec<CacheEntryStats> = entries
            .values()
            .map(|entry| CacheEntryStats {
                created_at: entry.created_at,
                holders: Arc::strong_count(&entry.store) - 1,
                store: entry.store.stats(),
            })
            .collect();
        stats.sort_by(|a, b| a.store.key.cmp(&b.store.key));
        stats
    }
}
