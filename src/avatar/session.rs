//! # Avatar Sessions
//!
//! One session is one client stream: a frame store, the driver that plays it and
//! a lifecycle state. The registry enforces the concurrent session limit and is
//! the only place sessions are looked up by id.
//!
//! ## Session Lifecycle:
//! 1. **Created**: frame set loaded, no transport attached yet
//! 2. **Streaming**: one WebSocket transport owns the frame clock; a session
//!    is attached at most once
//! 3. **Closed**: removed from the registry; holders drop it when done

use crate::avatar::driver::{AvatarTrackDriver, DriverStats};
use crate::config::VideoConfig;
use crate::video::store::{FrameStore, FrameStoreStats};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const SESSION_ID_PREFIX: &str = "sess_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Streaming,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        }
    }
}

/// Body of a stream creation request. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRequest {
    pub video_id: Option<String>,
    pub gesture_video: Option<String>,
    pub idle_video: Option<String>,
    #[serde(default)]
    pub use_ai: bool,
}

/// Source pair a session plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoPair {
    pub gesture: PathBuf,
    pub idle: PathBuf,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("video_id must be a single file name component, got {0:?}")]
    InvalidVideoId(String),
}

impl StreamRequest {
    /// Work out which source pair to play.
    ///
    /// - `video_id` selects `<videos_dir>/<id>_gestos.mp4` and `<id>_reposo.mp4`
    /// - otherwise explicit paths are used, a missing one replaced by its default
    /// - if neither explicit path exists on disk, the default pair is used
    pub fn resolve(&self, videos: &VideoConfig) -> Result<VideoPair, RequestError> {
        if let Some(video_id) = non_empty(&self.video_id) {
            if !is_single_component(video_id) {
                return Err(RequestError::InvalidVideoId(video_id.to_string()));
            }
            let dir = Path::new(&videos.videos_dir);
            return Ok(VideoPair {
                gesture: dir.join(format!("{video_id}_gestos.mp4")),
                idle: dir.join(format!("{video_id}_reposo.mp4")),
            });
        }

        let defaults = VideoPair {
            gesture: PathBuf::from(&videos.default_gesture),
            idle: PathBuf::from(&videos.default_idle),
        };
        let gesture = non_empty(&self.gesture_video).map(PathBuf::from);
        let idle = non_empty(&self.idle_video).map(PathBuf::from);

        let any_usable = [&gesture, &idle]
            .into_iter()
            .flatten()
            .any(|path| path.exists());
        if !any_usable {
            if gesture.is_some() || idle.is_some() {
                debug!("Requested videos not found, using default pair");
            }
            return Ok(defaults);
        }

        Ok(VideoPair {
            gesture: gesture.unwrap_or(defaults.gesture),
            idle: idle.unwrap_or(defaults.idle),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn is_single_component(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !id.contains(|c| c == '/' || c == '\\')
}

pub fn new_session_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{SESSION_ID_PREFIX}{}", &hex[..24])
}

pub struct AvatarSession {
    pub id: String,
    pub videos: VideoPair,
    pub use_ai: bool,
    pub created_at: DateTime<Utc>,
    pub store: Arc<FrameStore>,
    pub driver: Arc<AvatarTrackDriver>,
    state: RwLock<SessionState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub videos: VideoPair,
    pub use_ai: bool,
    pub frames: FrameStoreStats,
    pub driver: DriverStats,
}

impl AvatarSession {
    pub fn new(
        id: String,
        videos: VideoPair,
        use_ai: bool,
        store: Arc<FrameStore>,
        driver: Arc<AvatarTrackDriver>,
    ) -> Self {
        Self {
            id,
            videos,
            use_ai,
            created_at: Utc::now(),
            store,
            driver,
            state: RwLock::new(SessionState::Created),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move from `Created` to `Streaming`. Otherwise returns the state that
    /// blocked the attach.
    pub fn start_streaming(&self) -> Result<(), SessionState> {
        let mut state = self.state.write();
        match *state {
            SessionState::Created => {
                *state = SessionState::Streaming;
                Ok(())
            }
            other => Err(other),
        }
    }

    pub fn close(&self) {
        *self.state.write() = SessionState::Closed;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            videos: self.videos.clone(),
            use_ai: self.use_ai,
            frames: self.store.stats(),
            driver: self.driver.stats(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("maximum concurrent sessions ({max}) reached")]
    CapacityExceeded { max: usize },

    #[error("session id {0} already exists")]
    DuplicateId(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub total_sessions: usize,
    pub max_sessions: usize,
    pub state_counts: HashMap<String, usize>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<AvatarSession>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Cheap pre-check before building a frame set for a new session.
    pub fn has_capacity(&self) -> bool {
        self.sessions.read().len() < self.max_sessions
    }

    pub fn insert(&self, session: AvatarSession) -> Result<Arc<AvatarSession>, RegistryError> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_sessions,
            });
        }
        if sessions.contains_key(&session.id) {
            return Err(RegistryError::DuplicateId(session.id.clone()));
        }

        let session = Arc::new(session);
        sessions.insert(session.id.clone(), Arc::clone(&session));
        info!(session_id = %session.id, active = sessions.len(), "Session registered");
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<AvatarSession>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Remove and close a session. Returns it if it was registered.
    pub fn remove(&self, session_id: &str) -> Option<Arc<AvatarSession>> {
        let removed = self.sessions.write().remove(session_id);
        if let Some(session) = &removed {
            session.close();
            info!(session_id, "Session closed");
        }
        removed
    }

    /// Close every session, for shutdown.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().drain().collect();
        for (_, session) in &drained {
            session.close();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read();
        let mut state_counts = HashMap::new();
        for session in sessions.values() {
            *state_counts
                .entry(session.state().as_str().to_string())
                .or_insert(0) += 1;
        }
        RegistrySummary {
            total_sessions: sessions.len(),
            max_sessions: self.max_sessions,
            state_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::driver::DriverConfig;
    use crate::video::cache::CacheKey;
    use crate::video::frame::CanvasSize;
    use crate::video::testing::numbered_frames;
    use std::fs;

    fn videos(dir: &Path) -> VideoConfig {
        VideoConfig {
            videos_dir: dir.display().to_string(),
            default_gesture: dir.join("default_gestos.mp4").display().to_string(),
            default_idle: dir.join("default_reposo.mp4").display().to_string(),
            ..VideoConfig::default()
        }
    }

    fn session(id: &str) -> AvatarSession {
        let store = Arc::new(
            FrameStore::from_sequences(
                CacheKey::new("g", "i"),
                numbered_frames(2, CanvasSize::new(2, 2), 0),
                numbered_frames(2, CanvasSize::new(2, 2), 1),
                25,
            )
            .unwrap(),
        );
        let driver = Arc::new(AvatarTrackDriver::new(
            store.clone(),
            None,
            DriverConfig::default(),
        ));
        AvatarSession::new(
            id.to_string(),
            VideoPair {
                gesture: "g".into(),
                idle: "i".into(),
            },
            false,
            store,
            driver,
        )
    }

    #[test]
    fn test_session_id_format() {
        let id = new_session_id();
        assert!(id.starts_with("sess_"));
        assert_eq!(id.len(), 5 + 24);
        assert!(id[5..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn test_resolve_video_id() {
        let dir = tempfile::tempdir().unwrap();
        let request = StreamRequest {
            video_id: Some("maria".into()),
            ..StreamRequest::default()
        };

        let pair = request.resolve(&videos(dir.path())).unwrap();
        assert_eq!(pair.gesture, dir.path().join("maria_gestos.mp4"));
        assert_eq!(pair.idle, dir.path().join("maria_reposo.mp4"));
    }

    #[test]
    fn test_resolve_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["../secret", "a/b", "/etc/passwd", "..", ".", "a\\b"] {
            let request = StreamRequest {
                video_id: Some(bad.into()),
                ..StreamRequest::default()
            };
            assert!(
                matches!(request.resolve(&videos(dir.path())), Err(RequestError::InvalidVideoId(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_defaults_without_usable_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = videos(dir.path());

        let empty = StreamRequest::default().resolve(&config).unwrap();
        assert_eq!(empty.gesture, dir.path().join("default_gestos.mp4"));

        let missing = StreamRequest {
            gesture_video: Some("/nope/g.mp4".into()),
            idle_video: Some("/nope/i.mp4".into()),
            ..StreamRequest::default()
        }
        .resolve(&config)
        .unwrap();
        assert_eq!(missing, empty);
    }

    #[test]
    fn test_resolve_explicit_paths() {
        let dir = tempfile::tempdir().unwrap();
        let gesture = dir.path().join("custom_g.mp4");
        fs::write(&gesture, b"not really a video").unwrap();
        let config = videos(dir.path());

        let pair = StreamRequest {
            gesture_video: Some(gesture.display().to_string()),
            ..StreamRequest::default()
        }
        .resolve(&config)
        .unwrap();

        assert_eq!(pair.gesture, gesture);
        assert_eq!(pair.idle, dir.path().join("default_reposo.mp4"));
    }

    #[test]
    fn test_registry_capacity() {
        let registry = SessionRegistry::new(2);
        registry.insert(session("sess_a")).unwrap();
        registry.insert(session("sess_b")).unwrap();

        assert!(!registry.has_capacity());
        assert_eq!(
            registry.insert(session("sess_c")).err(),
            Some(RegistryError::CapacityExceeded { max: 2 })
        );
    }

    #[test]
    fn test_registry_duplicate_id() {
        let registry = SessionRegistry::new(4);
        registry.insert(session("sess_a")).unwrap();
        assert!(matches!(
            registry.insert(session("sess_a")),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_session_lifecycle() {
        let registry = SessionRegistry::new(4);
        let session = registry.insert(session("sess_a")).unwrap();
        assert_eq!(session.state(), SessionState::Created);

        assert_eq!(session.start_streaming(), Ok(()));
        assert_eq!(registry.summary().state_counts.get("streaming"), Some(&1));

        let removed = registry.remove("sess_a").unwrap();
        assert_eq!(removed.state(), SessionState::Closed);
        assert_eq!(removed.start_streaming(), Err(SessionState::Closed));
        assert!(registry.get("sess_a").is_none());
        assert!(registry.remove("sess_a").is_none());
    }

    #[test]
    fn test_second_attach_rejected() {
        let session = session("sess_a");
        assert_eq!(session.start_streaming(), Ok(()));
        assert_eq!(session.start_streaming(), Err(SessionState::Streaming));
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_close_all() {
        let registry = SessionRegistry::new(4);
        let a = registry.insert(session("sess_a")).unwrap();
        registry.insert(session("sess_b")).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(a.state(), SessionState::Closed);
    }

    #[test]
    fn test_summary_serializes() {
        let summary = session("sess_a").summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["session_id"], "sess_a");
        assert_eq!(json["state"], "created");
        assert_eq!(json["frames"]["idle_frames"], 2);
    }
}
