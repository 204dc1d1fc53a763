pub mod cache;
pub mod config;
pub mod debug;
pub mod streams;

pub use cache::*;
pub use config::*;
pub use debug::*;
pub use streams::*;

use actix_web::web;

/// Session control and frame pull routes under `/streams`.
pub fn configure_stream_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/streams")
            .route("", web::post().to(create_stream))
            .route("/{id}", web::get().to(get_stream))
            .route("/{id}", web::delete().to(delete_stream))
            .route("/{id}/audio", web::post().to(push_audio))
            .route("/{id}/frame", web::get().to(pull_frame))
            .route("/{id}/frame_at", web::get().to(frame_at))
            .route("/{id}/talk", web::post().to(talk)),
    );
}
