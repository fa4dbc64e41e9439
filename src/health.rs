//! # Health, Diagnostics and Metrics
//!
//! ## Endpoints:
//! - **GET /health**, **GET /_health**: liveness with uptime, memory and counters
//! - **GET /ping**: cheapest possible liveness probe
//! - **GET /test**: deployment diagnostics (environment echo, FFmpeg availability)
//! - **GET /metrics**: per-endpoint request statistics and analysis outcomes

use crate::audio::FfmpegTranscoder;
use crate::config::parse_origins;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::env;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_analyses": metrics.active_analyses,
            "header_sessions": state.headers.len(),
        },
        "memory": get_memory_info(),
    }))
}

pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "message": "pong"
    }))
}

/// Echo of the settings a deployment most often gets wrong.
pub async fn diagnostics(state: web::Data<AppState>) -> HttpResponse {
    let ffmpeg = match FfmpegTranscoder::probe(&state.config.audio.ffmpeg_path).await {
        Ok(version) => json!({ "available": true, "version": version }),
        Err(error) => json!({ "available": false, "error": error }),
    };

    let cwd = env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|e| format!("unavailable: {}", e));

    let allowed_origins = env::var("ALLOWED_ORIGINS")
        .map(|raw| parse_origins(&raw))
        .unwrap_or_else(|_| state.config.cors.allowed_origins.clone());

    let schedule = state.analyzer.schedule();

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "message": "Server is running",
        "version": env!("CARGO_PKG_VERSION"),
        "working_directory": cwd,
        "environment": {
            "PORT": env::var("PORT").ok(),
            "HOST": env::var("HOST").ok(),
            "ALLOWED_ORIGINS": allowed_origins,
            "RAILWAY_ENVIRONMENT": env::var("RAILWAY_ENVIRONMENT").ok(),
        },
        "ffmpeg": ffmpeg,
        "polling": {
            "strategy": state.config.polling.strategy,
            "timeout_secs": schedule.timeout.as_secs(),
            "max_attempts": schedule.max_attempts,
        },
        "api_key_configured": !state.config.hume.api_key.is_empty(),
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoints: Vec<_> = metrics.endpoint_metrics.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));
    let endpoint_stats: Vec<_> = endpoints
        .into_iter()
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

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "analyses": {
            "completed": metrics.analyses_completed,
            "failed": metrics.analyses_failed,
            "active": metrics.active_analyses,
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info(),
    }))
}

/// Resident and virtual size of this process, from `/proc` on Linux.
pub fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field("VmRSS:"),
                "virtual_memory_bytes": field("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "pid": process::id()
    })
}
