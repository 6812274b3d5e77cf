pub mod upload;

use crate::error::AppError;
use crate::health;
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{web, HttpResponse};

pub use upload::{transcribe, upload};

/// Register every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/upload", web::post().to(upload))
        .route("/transcribe", web::post().to(transcribe))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        )
        // Also provide health check at root level for convenience
        .route("/health", web::get().to(health::health_check))
        .default_service(web::to(not_found));
}

/// Browser clients may call from any origin.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_header(header::CONTENT_TYPE)
        .max_age(3600)
}

pub async fn not_found() -> Result<HttpResponse, AppError> {
    Err(AppError::NotFound)
}
