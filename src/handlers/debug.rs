//! Debug endpoints for inspecting a session's frames without a transport.
//!
//! Nothing here advances playback, so they can be hit while a WebSocket is
//! streaming the same session.

use crate::error::AppError;
use crate::handlers::streams::{find_session, frame_response};
use crate::state::AppState;
use crate::video::source::{FrameSource, Mode};
use actix_web::{web, HttpResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct FrameAtQuery {
    /// Seconds into the looping playback; negative values wrap from the end
    pub t: f64,
    #[serde(default)]
    pub speaking: bool,
}

/// GET /streams/{id}/frame_at?t=1.5&speaking=true
pub async fn frame_at(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<FrameAtQuery>,
) -> Result<HttpResponse, AppError> {
    let session = find_session(&state, &path.into_inner())?;
    if !query.t.is_finite() {
        return Err(AppError::BadRequest(format!("t must be a finite number, got {}", query.t)));
    }

    let frame = session
        .store
        .frame_at_time(query.t, Mode::from_speaking(query.speaking));
    Ok(frame_response(HttpResponse::Ok(), &frame, query.speaking))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{request, test_state};
    use crate::video::store::PlayCursors;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_frame_at() {
        let state = test_state(4);
        let session = state.open_session(&request("maria")).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/streams/{id}/frame_at", web::get().to(frame_at)),
        )
        .await;

        // 0.2s at 25 fps is index 5, wrapped into the 4 idle frames
        let idle = test::call_and_read_body(
            &app,
            test::TestRequest::get()
                .uri(&format!("/streams/{}/frame_at?t=0.2", session.id))
                .to_request(),
        )
        .await;
        assert_eq!(&idle[..3], &[1, 0, 1]);

        let gesture = test::call_and_read_body(
            &app,
            test::TestRequest::get()
                .uri(&format!("/streams/{}/frame_at?t=0.08&speaking=true", session.id))
                .to_request(),
        )
        .await;
        assert_eq!(&gesture[..3], &[2, 0, 2]);

        assert_eq!(session.store.cursors(), PlayCursors::default());
    }

    #[actix_web::test]
    async fn test_frame_at_errors() {
        let state = test_state(4);
        let session = state.open_session(&request("maria")).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/streams/{id}/frame_at", web::get().to(frame_at)),
        )
        .await;

        let unknown = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/streams/sess_missing/frame_at?t=0")
                .to_request(),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let missing_t = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/streams/{}/frame_at", session.id))
                .to_request(),
        )
        .await;
        assert_eq!(missing_t.status(), StatusCode::BAD_REQUEST);
    }
}
