//! # Configuration Management
//!
//! Loads the service configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP__` prefix (`APP__POLLING__STRATEGY=fixed`)
//! - Platform variables used by hosting providers: `HOST`, `PORT`,
//!   `ALLOWED_ORIGINS` and `HUME_API_KEY`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (`HOST`, `PORT`, `ALLOWED_ORIGINS`, `HUME_API_KEY`)
//! 2. `APP__` environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: `Deserialize` turns the merged `config` sources into these structs
//! - **Default impl**: every field has a built-in value, so an empty
//!   environment still yields a complete `AppConfig` (minus the API key)
//! - **Result<T, E>**: `load` and `validate` return `anyhow::Result` so `main`
//!   can stop with a readable message

use crate::prosody::poll::PollStrategy;
use anyhow::Result;                   // Error type with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML and env values
use std::env;                         // For reading platform variables
use std::path::PathBuf;
use std::time::Duration;

/// Origins allowed when `ALLOWED_ORIGINS` is not set.
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";

/// Default Hume batch jobs endpoint.
pub const DEFAULT_HUME_JOBS_URL: &str = "https://api.hume.ai/v0/batch/jobs";

/// Main application configuration, grouped by concern.
///
/// ## Why separate config structs:
/// Each section maps to one `[table]` in `config.toml` and one
/// `APP__<SECTION>__` prefix in the environment, so related settings stay
/// together and can be overridden as a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub hume: HumeConfig,
    pub polling: PollingConfig,
    pub audio: AudioConfig,
    pub cleanup: CleanupConfig,
}

/// HTTP listener settings.
///
/// `max_connections` and `keep_alive_secs` are the only inbound throttles;
/// there is no per-client rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,  // "0.0.0.0" in containers, "127.0.0.1" for local-only
    pub port: u16,     // Hosting platforms inject this through PORT
    pub keep_alive_secs: u64,
    /// Per-worker connection limit.
    pub max_connections: usize,
}

/// Cross-origin settings for the browser client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub max_age_secs: usize,
}

/// Credentials and transport settings for the Hume batch API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumeConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// Job status polling.
///
/// `strategy` is either `"fixed"` (constant interval, wall-clock timeout only)
/// or `"adaptive"` (duration-scaled first delay, jittered interval that reacts
/// to job progress, attempt cap plus wall-clock timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub strategy: String,
    pub timeout_secs: u64,
    pub fixed_interval_ms: u64,
    pub base_interval_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub min_initial_delay_ms: u64,
    pub max_initial_delay_ms: u64,
    /// Extra initial delay per second of audio.
    pub initial_delay_per_audio_sec_ms: u64,
    pub jitter_ratio: f64,
    pub max_attempts: u32,
    /// Polls without progress before the interval starts growing.
    pub stall_attempts: u32,
}

/// Upload handling and transcoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    /// Directory for `tmp*.webm` / `tmp*.wav` files. Falls back to the system temp dir.
    pub temp_dir: Option<String>,
    /// How many leading bytes of a session's first chunk are kept as its container header.
    pub header_bytes: usize,
    pub max_upload_bytes: usize,
    pub max_concurrent_transcodes: usize,
    pub transcode_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
}

/// Temp-file sweeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub sweep_interval_secs: u64,
    /// Periodic sweeps only remove files older than this, so in-flight uploads survive.
    pub stale_after_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                keep_alive_secs: 30,
                max_connections: 10,
            },
            cors: CorsConfig {
                allowed_origins: parse_origins(DEFAULT_ALLOWED_ORIGINS),
                max_age_secs: 3600,
            },
            hume: HumeConfig {
                api_key: String::new(),
                base_url: DEFAULT_HUME_JOBS_URL.to_string(),
                request_timeout_secs: 30,
            },
            polling: PollingConfig {
                strategy: "adaptive".to_string(),
                timeout_secs: 30,
                fixed_interval_ms: 500,
                base_interval_ms: 1000,
                min_interval_ms: 250,
                max_interval_ms: 3000,
                min_initial_delay_ms: 1200,
                max_initial_delay_ms: 2000,
                initial_delay_per_audio_sec_ms: 100,
                jitter_ratio: 0.1,  // ±10% per sleep
                max_attempts: 10,
                stall_attempts: 3,
            },
            audio: AudioConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                temp_dir: None,
                header_bytes: 4096,
                max_upload_bytes: 50 * 1024 * 1024,  // 50 MB
                max_concurrent_transcodes: 4,
                transcode_timeout_secs: 60,
                session_ttl_secs: 15 * 60,  // idle sessions forget their header
                max_sessions: 1024,
            },
            cleanup: CleanupConfig {
                sweep_interval_secs: 600,
                stale_after_secs: 300,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__PORT=3000`: override any key by path
    /// - `PORT=3000` / `HOST=0.0.0.0`: platform bindings
    /// - `ALLOWED_ORIGINS=https://a.example,https://b.example`
    /// - `HUME_API_KEY=...`
    pub fn load() -> Result<Self> {
        // Later sources override earlier ones
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // config.toml is optional; a missing file is not an error
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        // Platform variables use plain names, so they are applied by hand
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(raw) = env::var("ALLOWED_ORIGINS") {
            settings = settings.set_override("cors.allowed_origins", parse_origins(&raw))?;
        }

        if let Ok(key) = env::var("HUME_API_KEY") {
            settings = settings.set_override("hume.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_connections == 0 {
            return Err(anyhow::anyhow!("Max connections must be greater than 0"));
        }

        if self.hume.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("HUME_API_KEY not found in environment variables"));
        }

        if self.audio.header_bytes == 0 {
            return Err(anyhow::anyhow!("Header cache size must be greater than 0"));
        }

        if self.audio.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.audio.max_concurrent_transcodes == 0 {
            return Err(anyhow::anyhow!("Max concurrent transcodes must be greater than 0"));
        }

        PollStrategy::parse(&self.polling.strategy)?;

        if self.polling.min_interval_ms > self.polling.max_interval_ms {
            return Err(anyhow::anyhow!("Polling min interval exceeds max interval"));
        }

        if self.polling.min_initial_delay_ms > self.polling.max_initial_delay_ms {
            return Err(anyhow::anyhow!("Polling min initial delay exceeds max initial delay"));
        }

        if !(0.0..1.0).contains(&self.polling.jitter_ratio) {
            return Err(anyhow::anyhow!("Polling jitter ratio must be in [0, 1)"));
        }

        Ok(())
    }

    /// Directory used for transcoder temp files and sweeps.
    pub fn temp_dir(&self) -> PathBuf {
        self.audio
            .temp_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.server.keep_alive_secs)
    }
}

/// Split a comma-separated origin list, dropping blanks and stray `;` suffixes
/// that some dashboards append to environment values.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches(';').trim())
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
