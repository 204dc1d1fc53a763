use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// GET /cache
pub async fn list_cache(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "keys": state.frame_cache.keys(),
        "entries": state.frame_cache.stats()
    })))
}

/// DELETE /cache
///
/// Sessions already holding a frame set keep playing it; only new sessions
/// trigger a rebuild.
pub async fn clear_cache(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let evicted = state.frame_cache.clear();
    info!(evicted, "Frame set cache cleared");

    Ok(HttpResponse::Ok().json(json!({
        "status": "cleared",
        "evicted": evicted
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{request, test_state};
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_list_and_clear_cache() {
        let state = test_state(4);
        let session = state.open_session(&request("maria")).await.unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/cache", web::get().to(list_cache))
                .route("/cache", web::delete().to(clear_cache)),
        )
        .await;

        let listed: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/cache").to_request())
                .await;
        assert_eq!(listed["keys"].as_array().map(Vec::len), Some(1));
        assert_eq!(listed["entries"][0]["gesture_frames"], 6);

        let cleared: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::delete().uri("/cache").to_request(),
        )
        .await;
        assert_eq!(cleared["evicted"], 1);
        assert_eq!(state.frame_cache.len(), 0);

        // the live session keeps its frames
        assert_eq!(session.store.stats().idle_frames, 4);
    }
}
