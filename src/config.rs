//! # Configuration Management
//!
//! Loads the server configuration from layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - `config.toml` in the working directory, if present
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT`, then `AVATAR_HOST` / `AVATAR_PORT`
//! 2. `APP_<SECTION>__<KEY>` environment variables, e.g. `APP_VIDEO__TARGET_FPS=30`
//! 3. `config.toml`
//! 4. Defaults
//!
//! Section and key are separated by a double underscore so that keys which
//! contain underscores (`target_fps`, `max_concurrent_sessions`) stay intact.

use crate::avatar::driver::DriverConfig;
use crate::avatar::transformer::TransformerKind;
use crate::video::frame::CanvasSize;
use crate::video::normalizer::NormalizerOptions;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration.
///
/// ## Sections:
/// - **server**: bind address
/// - **video**: source videos and frame normalization
/// - **avatar**: per-session driver behavior
/// - **performance**: resource limits
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub video: VideoConfig,
    pub avatar: AvatarConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

/// Where source videos live and how they are turned into frames.
///
/// ## Naming convention:
/// A `video_id` of `maria` selects `<videos_dir>/maria_gestos.mp4` (gesture)
/// and `<videos_dir>/maria_reposo.mp4` (idle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub videos_dir: String,
    pub default_gesture: String,
    pub default_idle: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Upper bound on frames kept per source video
    pub extraction_cap: usize,
    /// Per-source decode budget
    pub decode_timeout_secs: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            videos_dir: "./videos".to_string(),
            default_gesture: "./videos/default_gestos.mp4".to_string(),
            default_idle: "./videos/default_reposo.mp4".to_string(),
            target_fps: 25,
            width: 512,
            height: 512,
            extraction_cap: 300,
            decode_timeout_secs: 60,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl VideoConfig {
    pub fn canvas(&self) -> CanvasSize {
        CanvasSize::new(self.width, self.height)
    }

    pub fn normalizer_options(&self) -> NormalizerOptions {
        NormalizerOptions {
            canvas: self.canvas(),
            target_fps: self.target_fps,
            extraction_cap: self.extraction_cap,
            decode_budget: Some(Duration::from_secs(self.decode_timeout_secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfig {
    /// How long after the last audio chunk the avatar keeps gesturing
    pub hangover_ms: u64,
    pub audio_queue_depth: usize,
    /// Transformer attached to sessions created with `use_ai`
    pub transformer: TransformerKind,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            hangover_ms: 500,
            audio_queue_depth: 10,
            transformer: TransformerKind::None,
        }
    }
}

impl AvatarConfig {
    pub fn driver_config(&self, fps: u32) -> DriverConfig {
        DriverConfig {
            fps,
            hangover: Duration::from_millis(self.hangover_ms),
            audio_queue_depth: self.audio_queue_depth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 32,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set HOST/PORT; AVATAR_* are the service's own names
        for (var, key) in [
            ("AVATAR_HOST", "server.host"),
            ("AVATAR_PORT", "server.port"),
            ("HOST", "server.host"),
            ("PORT", "server.port"),
        ] {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }
        if self.video.target_fps == 0 {
            return Err(anyhow!("Target fps must be greater than 0"));
        }
        if self.video.width == 0 || self.video.height == 0 {
            return Err(anyhow!(
                "Canvas size must be non-zero, got {}",
                self.video.canvas()
            ));
        }
        if self.video.extraction_cap == 0 {
            return Err(anyhow!("Extraction cap must be greater than 0"));
        }
        if self.video.decode_timeout_secs == 0 {
            return Err(anyhow!("Decode timeout must be greater than 0"));
        }
        if self.avatar.hangover_ms == 0 {
            return Err(anyhow!("Hangover must be greater than 0"));
        }
        if self.avatar.audio_queue_depth == 0 {
            return Err(anyhow!("Audio queue depth must be greater than 0"));
        }
        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow!("Max concurrent sessions must be greater than 0"));
        }
        Ok(())
    }

    /// Apply a partial JSON document on top of the current values.
    ///
    /// Only the fields present are changed, e.g. `{"avatar": {"hangover_ms": 800}}`.
    /// The result is validated before anything is replaced.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;
        if !partial.is_object() {
            return Err(anyhow!("Config update must be a JSON object"));
        }

        let mut merged = serde_json::to_value(&*self)?;
        merge_json(&mut merged, partial);

        let updated: AppConfig = serde_json::from_value(merged)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}
