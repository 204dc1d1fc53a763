//! # Application State
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## Contents:
//! - **config**: runtime-updatable configuration
//! - **metrics**: request counters fed by the metrics middleware
//! - **frame_cache**: process-wide frame stores, shared between sessions
//! - **sessions**: the live session registry
//! - **transformer**: the frame transformer sessions with `use_ai` share
//!
//! ## Locking:
//! Config, metrics and transformer sit behind `parking_lot::RwLock`. Locks are
//! only held long enough to copy data out and never across an `.await`.

use crate::avatar::driver::AvatarTrackDriver;
use crate::avatar::session::{new_session_id, AvatarSession, SessionRegistry, StreamRequest};
use crate::avatar::transformer::FrameTransformer;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::video::cache::FrameSetCache;
use crate::video::decoder::VideoDecoder;
use crate::video::ffmpeg::FfmpegDecoder;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub frame_cache: Arc<FrameSetCache>,
    pub sessions: Arc<SessionRegistry>,
    transformer: Arc<RwLock<Option<Arc<dyn FrameTransformer>>>>,
    pub start_time: Instant,
}

/// Request counters collected by the metrics middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Keyed by `"METHOD /path"`, with session ids collapsed to `{id}`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// State backed by the ffmpeg decoder named in the config.
    pub fn new(config: AppConfig) -> Self {
        let decoder = Arc::new(FfmpegDecoder::new(
            &config.video.ffmpeg_path,
            &config.video.ffprobe_path,
        ));
        Self::with_decoder(config, decoder)
    }

    pub fn with_decoder(config: AppConfig, decoder: Arc<dyn VideoDecoder>) -> Self {
        let sessions = SessionRegistry::new(config.performance.max_concurrent_sessions);
        let transformer = config.avatar.transformer.build();

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            frame_cache: Arc::new(FrameSetCache::new(decoder)),
            sessions: Arc::new(sessions),
            transformer: Arc::new(RwLock::new(transformer)),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Validate and install a new configuration.
    ///
    /// A changed transformer kind applies to sessions created afterwards. The
    /// session limit is fixed at startup.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;

        let mut config = self.config.write();
        if config.avatar.transformer != new_config.avatar.transformer {
            info!(transformer = ?new_config.avatar.transformer, "Frame transformer changed");
            *self.transformer.write() = new_config.avatar.transformer.build();
        }
        *config = new_config;
        Ok(())
    }

    /// Resolve the request's videos, load (or reuse) their frame set and register
    /// a new session driving it.
    pub async fn open_session(&self, request: &StreamRequest) -> AppResult<Arc<AvatarSession>> {
        let config = self.get_config();

        if !self.sessions.has_capacity() {
            return Err(AppError::CapacityExceeded(format!(
                "maximum concurrent sessions ({}) reached",
                self.sessions.max_sessions()
            )));
        }

        let videos = request.resolve(&config.video)?;
        let store = self
            .frame_cache
            .get_or_create(
                videos.gesture.clone(),
                videos.idle.clone(),
                &config.video.normalizer_options(),
            )
            .await?;

        let transformer = if request.use_ai {
            let transformer = self.transformer.read().clone();
            if transformer.is_none() {
                debug!("No frame transformer configured, serving base frames");
            }
            transformer
        } else {
            None
        };

        let driver = AvatarTrackDriver::new(
            store.clone(),
            transformer,
            config.avatar.driver_config(store.target_fps()),
        );
        let session = AvatarSession::new(
            new_session_id(),
            videos,
            request.use_ai,
            store,
            Arc::new(driver),
        );

        Ok(self.sessions.insert(session)?)
    }

    pub fn transformer_name(&self) -> Option<String> {
        self.transformer.read().as_ref().map(|t| t.name().to_string())
    }

    pub fn close_session(&self, session_id: &str) -> Option<Arc<AvatarSession>> {
        self.sessions.remove(session_id)
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Share of failed requests, `0.0..=1.0`.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
