//! Session control endpoints.
//!
//! `POST /streams` loads the frame set and registers a session. Frames are then
//! pulled either tick by tick over `GET /streams/{id}/frame` or pushed over the
//! WebSocket transport at `/ws/streams/{id}`.

use crate::avatar::driver::OutputFrame;
use crate::avatar::feed::PushOutcome;
use crate::avatar::session::{AvatarSession, SessionState, StreamRequest};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::video::frame::{ChannelOrder, Frame};
use crate::video::source::FrameSource;
use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse, HttpResponseBuilder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub const FRAME_WIDTH_HEADER: &str = "x-frame-width";
pub const FRAME_HEIGHT_HEADER: &str = "x-frame-height";
pub const FRAME_PTS_HEADER: &str = "x-frame-pts";
pub const FRAME_TIME_BASE_HEADER: &str = "x-frame-time-base";
pub const SPEAKING_HEADER: &str = "x-avatar-speaking";

pub(crate) fn find_session(state: &AppState, session_id: &str) -> AppResult<Arc<AvatarSession>> {
    state
        .sessions
        .get(session_id)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))
}

/// Raw `rgb24` body plus geometry headers.
pub(crate) fn frame_response(mut builder: HttpResponseBuilder, frame: &Frame, speaking: bool) -> HttpResponse {
    builder
        .content_type(ContentType::octet_stream())
        .insert_header((FRAME_WIDTH_HEADER, frame.width().to_string()))
        .insert_header((FRAME_HEIGHT_HEADER, frame.height().to_string()))
        .insert_header((SPEAKING_HEADER, speaking.to_string()))
        .body(web::Bytes::copy_from_slice(frame.data()))
}

/// POST /streams
///
/// Body is optional; an empty body plays the default video pair.
pub async fn create_stream(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let request: StreamRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StreamRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    let session = state.open_session(&request).await?;
    let canvas = session.store.canvas();
    info!(
        session_id = %session.id,
        gesture = %session.videos.gesture.display(),
        idle = %session.videos.idle.display(),
        use_ai = session.use_ai,
        "Stream created"
    );

    Ok(HttpResponse::Ok().json(json!({
        "id": session.id,
        "session_id": session.id,
        "gesture_video": session.videos.gesture,
        "idle_video": session.videos.idle,
        "use_ai": session.use_ai,
        "frame": {
            "width": canvas.width,
            "height": canvas.height,
            "fps": session.driver.config().fps,
            "channel_order": ChannelOrder::Rgb24.as_str()
        },
        "stream_url": format!("/ws/streams/{}", session.id)
    })))
}

/// GET /streams/{id}
pub async fn get_stream(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(session.summary()))
}

/// DELETE /streams/{id}
pub async fn delete_stream(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let session = state
        .close_session(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

    let stats = session.driver.stats();
    Ok(HttpResponse::Ok().json(json!({
        "status": "closed",
        "session_id": session_id,
        "frames_produced": stats.ticks,
        "audio_dropped": stats.audio_dropped
    })))
}

/// POST /streams/{id}/audio
///
/// The raw body is one audio chunk. Never blocks; a full queue drops the chunk.
pub async fn push_audio(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path.into_inner())?;
    if body.is_empty() {
        return Err(AppError::BadRequest("Audio chunk is empty".to_string()));
    }

    let outcome = session.driver.add_audio(&body);
    Ok(HttpResponse::Accepted().json(json!({
        "queued": outcome == PushOutcome::Queued,
        "dropped_total": session.driver.audio_dropped()
    })))
}

/// GET /streams/{id}/frame
///
/// Runs one tick of the session's driver. Refused while a WebSocket owns the
/// session's frame clock.
pub async fn pull_frame(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path.into_inner())?;
    if session.state() == SessionState::Streaming {
        return Err(AppError::Conflict(format!(
            "Session {} is streaming over WebSocket",
            session.id
        )));
    }
    let output: OutputFrame = session.driver.produce_frame().await;

    let mut builder = HttpResponse::Ok();
    builder
        .insert_header((FRAME_PTS_HEADER, output.pts.to_string()))
        .insert_header((FRAME_TIME_BASE_HEADER, output.time_base.to_string()));
    Ok(frame_response(builder, &output.frame, output.speaking))
}

#[derive(Debug, Deserialize)]
pub struct TalkRequest {
    pub script: TalkScript,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TalkScript {
    Audio { audio_url: String },
    Text { input: String },
}

/// POST /streams/{id}/talk
///
/// Acknowledges a script. Speech synthesis and audio download are not done here;
/// clients feed audio through `/streams/{id}/audio` or the WebSocket.
pub async fn talk(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<TalkRequest>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path.into_inner())?;

    match &body.script {
        TalkScript::Audio { audio_url } => {
            warn!(session_id = %session.id, audio_url = %audio_url, "Audio talk scripts are not fetched");
        }
        TalkScript::Text { input } => {
            warn!(session_id = %session.id, chars = input.chars().count(), "Text talk scripts are not synthesized");
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "status": "ok" })))
}
