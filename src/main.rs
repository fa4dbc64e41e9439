//! # Prosody Backend
//!
//! HTTP service that turns browser audio recordings into emotion scores.
//!
//! ## Request Flow:
//! ```text
//! Browser ──multipart──► /analyze ──► header repair ──► FFmpeg ──► WAV
//!                                                                   │
//!        ◄──── {emotions, timing} ◄── predictions ◄── poll ◄── submit
//! ```
//!
//! ## Startup:
//! 1. Load `.env`, initialize tracing
//! 2. Load and validate layered configuration
//! 3. Log diagnostics and sweep leftover temp files
//! 4. Serve until SIGTERM/SIGINT, then sweep again
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: FFmpeg, the Hume calls and the poll sleeps all yield to
//!   the runtime instead of blocking a worker thread
//! - **trait objects**: `Arc<dyn AudioTranscoder>` and `Arc<dyn ProsodyApi>`
//!   let tests swap the real pipeline for in-memory fakes
//! - **static + atomics**: `SHUTDOWN_SIGNAL` is written by the signal task and
//!   read by the main task without a lock
//!
//! ## Application Architecture:
//! - **config**: layered settings (defaults, `config.toml`, environment)
//! - **state**: shared pipeline components and metrics
//! - **audio**: header repair, FFmpeg transcoding, WAV decoding, temp cleanup
//! - **prosody**: Hume client, job polling, emotion extraction
//! - **handlers**: `/analyze` and the JSON fallbacks
//! - **health**: liveness, diagnostics and metrics endpoints
//! - **middleware**: request logging and per-route metrics
//! - **error**: `AppError` and its `{"detail": ...}` rendering

// Module declarations
mod audio;       // Upload repair, transcoding, WAV decoding (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error types and HTTP error responses (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health, diagnostics and metrics endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod prosody;     // Emotion analysis client (prosody/ directory)
mod state;       // Shared application state (state.rs)

use crate::audio::cleanup::{spawn_periodic_sweeper, sweep_temp_files_async};
use crate::audio::FfmpegTranscoder;
use actix_cors::Cors;                          // Cross-Origin Resource Sharing support
use actix_web::http::StatusCode;
use actix_web::middleware::ErrorHandlers;      // Rewrites untyped 500 responses
use actix_web::{web, App, HttpServer};         // Web framework
use anyhow::Result;                            // Startup errors with context
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering}; // Lock-free shutdown flag
use std::time::Duration;
use tracing::{error, info, warn};              // Structured logging
use tracing_actix_web::TracingLogger;          // One tracing span per request
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives. `wait_for_shutdown` polls it and the
/// main task then stops the server gracefully.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from defaults, `config.toml` and the environment
/// 2. **Sets up logging** through `tracing`
/// 3. **Sweeps temp files** left behind by a previous crash
/// 4. **Builds shared state**: FFmpeg transcoder, Hume client, poll schedule
/// 5. **Configures the HTTP server** with CORS, middleware and routes
/// 6. **Handles graceful shutdown** on SIGTERM/SIGINT, then sweeps again
///
/// ## Error Handling:
/// A missing `HUME_API_KEY`, an unknown poll strategy or a port that cannot be
/// bound ends startup with an error before any request is served.
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists).
    // .ok() ignores the error when there is no .env file.
    dotenv::dotenv().ok();

    // Tracing first, so configuration failures are logged
    init_tracing()?;

    // Defaults < config.toml < APP__ variables < platform variables
    let config = AppConfig::load()?;
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    log_startup_diagnostics(&config).await;

    // Files from a previous run are never in use, so no age filter here
    let temp_dir = config.temp_dir();
    let report = sweep_temp_files_async(temp_dir.clone(), None).await;
    info!(removed = report.removed, failed = report.failed, "Startup temp sweep finished");

    // Shared by every worker; cloning only bumps Arc reference counts
    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Background task: stale temp files and idle header sessions
    let sweeper = spawn_periodic_sweeper(
        temp_dir.clone(),
        Duration::from_secs(config.cleanup.sweep_interval_secs),
        Duration::from_secs(config.cleanup.stale_after_secs),
        app_state.headers.clone(),
    );

    setup_signal_handlers();

    info!(
        origins = ?config.cors.allowed_origins,
        strategy = %config.polling.strategy,
        "Starting HTTP server on {}",
        bind_addr
    );

    // HttpServer::new takes a factory closure that runs once per worker
    // thread, so everything it captures must be cloneable.
    let cors_config = config.cors.clone();
    let server = HttpServer::new(move || {
        let cors = cors_config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
            .expose_any_header()
            .max_age(cors_config.max_age_secs);

        // Middleware runs in reverse registration order: TracingLogger sees
        // the request first, ErrorHandlers sees the response last.
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(ErrorHandlers::new().handler(
                StatusCode::INTERNAL_SERVER_ERROR,
                handlers::internal_error,
            ))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .keep_alive(config.keep_alive())
    .max_connections(config.server.max_connections)
    .disable_signals() // our own handler owns SIGTERM/SIGINT
    .bind(&bind_addr)?
    .run();

    // Run the server on its own task so we can race it against the shutdown flag
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Stop the periodic sweeper before the final unconditional sweep
    sweeper.abort();
    let report = sweep_temp_files_async(temp_dir, None).await;
    info!(removed = report.removed, failed = report.failed, "Shutdown temp sweep finished");

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` wins when set; otherwise this crate logs at debug and actix at
/// info.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prosody_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// What an operator needs to debug a broken deployment. The API key is
/// never logged, only its length.
async fn log_startup_diagnostics(config: &AppConfig) {
    info!("Starting prosody-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(pid = std::process::id(), "Process started");

    match std::env::current_dir() {
        Ok(dir) => info!(cwd = %dir.display(), "Working directory"),
        Err(e) => warn!(error = %e, "Working directory unavailable"),
    }

    info!(memory = %health::get_memory_info(), "Memory usage");
    info!(
        host = %config.server.host,
        port = config.server.port,
        temp_dir = %config.temp_dir().display(),
        "Configuration loaded"
    );
    info!(api_key_len = config.hume.api_key.len(), "Hume API key configured");
    if let Ok(env_name) = std::env::var("RAILWAY_ENVIRONMENT") {
        info!(environment = %env_name, "Deployment environment");
    }

    match FfmpegTranscoder::probe(&config.audio.ffmpeg_path).await {
        Ok(version) => info!(version = %version, "FFmpeg available"),
        Err(e) => warn!(path = %config.audio.ffmpeg_path, error = %e, "FFmpeg not available"),
    }
}

/// Spawn a task that flips `SHUTDOWN_SIGNAL` on SIGTERM (what container
/// platforms send on redeploy) or SIGINT (Ctrl-C).
#[cfg(unix)]
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

#[cfg(not(unix))]
fn setup_signal_handlers() {
    tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl-C");
                return;
            }
        }
        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Resolve once `SHUTDOWN_SIGNAL` is set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
