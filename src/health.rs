use crate::config::AppConfig;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Liveness probe with a few counts.
pub async fn liveness(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "sessions": state.sessions.len(),
        "cached_frame_sets": state.frame_cache.len(),
        "transformer": state.transformer_name()
    }))
}

/// Service status: sessions, cache contents, request counters and memory.
pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let metrics = state.get_metrics_snapshot();
    let registry = state.sessions.summary();

    let sessions: Vec<_> = state
        .sessions
        .ids()
        .iter()
        .filter_map(|id| state.sessions.get(id))
        .map(|session| {
            json!({
                "session_id": session.id,
                "state": session.state(),
                "created_at": session.created_at.to_rfc3339(),
                "use_ai": session.use_ai
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "status": "running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "active_sessions": registry.total_sessions,
        "max_sessions": registry.max_sessions,
        "session_states": registry.state_counts,
        "sessions": sessions,
        "cache": {
            "keys": state.frame_cache.keys(),
            "frame_sets": state.frame_cache.stats()
        },
        "video": {
            "canvas": config.video.canvas().to_string(),
            "target_fps": config.video.target_fps,
            "videos_dir": config.video.videos_dir
        },
        "requests": {
            "total": metrics.request_count,
            "errors": metrics.error_count
        },
        "memory": get_memory_info()
    }))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_sessions = state.sessions.len();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": active_sessions
        },
        "frame_cache": {
            "entries": state.frame_cache.len()
        },
        "memory": get_memory_info(),
        "system": get_system_status(&config, active_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "active_sessions": state.sessions.len(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "frame_sets": state.frame_cache.stats(),
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, active_sessions: usize) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let session_usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{request, test_state};
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_liveness_counts_sessions() {
        let state = test_state(4);
        state.open_session(&request("maria")).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(liveness)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request())
                .await;
        assert_eq!(
            body,
            json!({"status": "ok", "sessions": 1, "cached_frame_sets": 1, "transformer": null})
        );
    }

    #[actix_web::test]
    async fn test_status_lists_sessions_and_cache() {
        let state = test_state(4);
        let session = state.open_session(&request("maria")).await.unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/status", web::get().to(status)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/status").to_request())
                .await;
        assert_eq!(body["active_sessions"], 1);
        assert_eq!(body["sessions"][0]["session_id"], session.id.as_str());
        assert_eq!(body["sessions"][0]["state"], "created");
        assert_eq!(
            body["cache"]["keys"][0],
            "./videos/maria_gestos.mp4::./videos/maria_reposo.mp4"
        );
        assert_eq!(body["cache"]["frame_sets"][0]["idle_frames"], 4);
    }

    #[actix_web::test]
    async fn test_system_status_load_levels() {
        let config = AppConfig::default();
        assert_eq!(get_system_status(&config, 0)["status"], "normal");
        assert_eq!(get_system_status(&config, 30)["status"], "high_load");
    }
}
