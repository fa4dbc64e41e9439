//! # HTTP Handlers
//!
//! Route table for the service. `configure` is shared by `main` and the
//! handler tests so both see the same routes.

pub mod analyze;
pub mod fallback;

pub use analyze::*;
pub use fallback::*;

use crate::health;
use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/analyze", web::post().to(analyze_audio))
        .route("/test", web::get().to(health::diagnostics))
        .route("/ping", web::get().to(health::ping))
        .route("/health", web::get().to(health::health_check))
        .route("/_health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .default_service(web::to(not_found));
}
