use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// Partial update; changes apply to sessions created afterwards.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": current_config
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_get_and_update_config() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(4)))
                .route("/api/v1/config", web::get().to(get_config))
                .route("/api/v1/config", web::put().to(update_config)),
        )
        .await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/config").to_request(),
        )
        .await;
        assert_eq!(body["config"]["avatar"]["hangover_ms"], 500);

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::put()
                .uri("/api/v1/config")
                .set_json(json!({"avatar": {"hangover_ms": 800}}))
                .to_request(),
        )
        .await;
        assert_eq!(body["updated_config"]["avatar"]["hangover_ms"], 800);

        let response = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/v1/config")
                .set_json(json!({"video": {"target_fps": 0}}))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
