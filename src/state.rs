//! # Application State
//!
//! Shared by every worker through `web::Data<AppState>`. Cloning is cheap:
//! everything lives behind an `Arc`.
//!
//! ## Contents:
//! - **config**: immutable after startup
//! - **metrics**: request and analysis counters behind `Arc<RwLock<_>>`
//! - **headers**: per-session container header cache
//! - **transcoder** / **analyzer**: the two pipeline stages, as trait objects
//!   so tests can swap in fakes

use crate::audio::{AudioTranscoder, FfmpegTranscoder, SessionHeaderStore};
use crate::config::AppConfig;
use crate::prosody::{HumeClient, PollSchedule, ProsodyAnalyzer, TokioClock};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
    pub headers: Arc<SessionHeaderStore>,
    pub transcoder: Arc<dyn AudioTranscoder>,
    pub analyzer: Arc<ProsodyAnalyzer>,
}

/// Counters collected across all requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    /// Analyses currently between upload and response.
    pub active_analyses: u32,
    /// Keyed by `"METHOD /path"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the production pipeline from configuration.
    pub fn new(config: AppConfig) -> Result<Self> {
        let transcoder = FfmpegTranscoder::new(
            config.audio.ffmpeg_path.clone(),
            config.temp_dir(),
            config.audio.max_concurrent_transcodes,
            Duration::from_secs(config.audio.transcode_timeout_secs),
        );
        let api = HumeClient::new(&config.hume)?;
        let schedule = PollSchedule::from_config(&config.polling)?;
        let analyzer = ProsodyAnalyzer::new(Arc::new(api), Arc::new(TokioClock), schedule);

        Ok(Self::with_components(config, Arc::new(transcoder), analyzer))
    }

    /// Assemble state around an existing transcoder and analyzer.
    pub fn with_components(
        config: AppConfig,
        transcoder: Arc<dyn AudioTranscoder>,
        analyzer: ProsodyAnalyzer,
    ) -> Self {
        let headers = SessionHeaderStore::new(
            config.audio.header_bytes,
            Duration::from_secs(config.audio.session_ttl_secs),
            config.audio.max_sessions,
        );

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            headers: Arc::new(headers),
            transcoder,
            analyzer: Arc::new(analyzer),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut(|m| m.error_count += 1);
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.metrics_mut(|m| {
            let metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            metric.request_count += 1;
            metric.total_duration_ms += duration_ms;
            if is_error {
                metric.error_count += 1;
            }
        });
    }

    /// Mark an analysis as started. The returned guard records the outcome
    /// when finished, or a failure if dropped early.
    pub fn begin_analysis(&self) -> AnalysisGuard {
        self.metrics_mut(|m| m.active_analyses += 1);
        AnalysisGuard {
            metrics: Arc::clone(&self.metrics),
            succeeded: false,
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn metrics_mut(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }
}

/// Tracks one in-flight analysis.
pub struct AnalysisGuard {
    metrics: Arc<RwLock<AppMetrics>>,
    succeeded: bool,
}

impl AnalysisGuard {
    pub fn succeed(mut self) {
        self.succeeded = true;
    }
}

impl Drop for AnalysisGuard {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_analyses = metrics.active_analyses.saturating_sub(1);
        if self.succeeded {
            metrics.analyses_completed += 1;
        } else {
            metrics.analyses_failed += 1;
        }
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::{TranscodeError, WavAudio};
    use crate::prosody::testing::{FakeApi, ManualClock};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transcoder that records its input and returns a fixed clip.
    pub(crate) struct FakeTranscoder {
        pub inputs: Mutex<Vec<Vec<u8>>>,
        pub output: Result<Vec<u8>, String>,
    }

    impl FakeTranscoder {
        pub(crate) fn returning(wav: Vec<u8>) -> Self {
            Self {
                inputs: Mutex::new(Vec::new()),
                output: Ok(wav),
            }
        }

        pub(crate) fn failing(stderr: &str) -> Self {
            Self {
                inputs: Mutex::new(Vec::new()),
                output: Err(stderr.to_string()),
            }
        }
    }

    #[async_trait]
    impl AudioTranscoder for FakeTranscoder {
        async fn to_wav(&self, input: &[u8]) -> Result<WavAudio, TranscodeError> {
            self.inputs.lock().unwrap().push(input.to_vec());
            match &self.output {
                Ok(wav) => Ok(WavAudio::from_bytes(wav.clone())?),
                Err(stderr) => Err(TranscodeError::Failed(stderr.clone())),
            }
        }
    }

    pub(crate) fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.hume.api_key = "test-key".to_string();
        config
    }

    pub(crate) fn test_state(transcoder: Arc<FakeTranscoder>, api: Arc<FakeApi>) -> AppState {
        test_state_with(test_config(), transcoder, api)
    }

    pub(crate) fn test_state_with(
        config: AppConfig,
        transcoder: Arc<FakeTranscoder>,
        api: Arc<FakeApi>,
    ) -> AppState {
        let schedule = PollSchedule::from_config(&config.polling).unwrap();
        let analyzer = ProsodyAnalyzer::new(api, Arc::new(ManualClock::new()), schedule).with_seed(9);
        AppState::with_components(config, transcoder, analyzer)
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state(
            Arc::new(FakeTranscoder::failing("x")),
            Arc::new(FakeApi::new(vec![])),
        );
        state.record_endpoint_request("GET /ping", 10, false);
        state.record_endpoint_request("GET /ping", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let ping = &snapshot.endpoint_metrics["GET /ping"];
        assert_eq!(ping.request_count, 2);
        assert_eq!(ping.average_duration_ms(), 20.0);
        assert_eq!(ping.error_rate(), 0.5);
    }

    #[test]
    fn test_analysis_guard_counts_outcomes() {
        let state = test_state(
            Arc::new(FakeTranscoder::failing("x")),
            Arc::new(FakeApi::new(vec![])),
        );

        let ok = state.begin_analysis();
        let failed = state.begin_analysis();
        assert_eq!(state.get_metrics_snapshot().active_analyses, 2);

        ok.succeed();
        drop(failed);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_analyses, 0);
        assert_eq!(snapshot.analyses_completed, 1);
        assert_eq!(snapshot.analyses_failed, 1);
    }

    #[test]
    fn test_production_state_builds() {
        let state = AppState::new(test_config()).unwrap();
        assert!(state.headers.is_empty());
        assert_eq!(state.analyzer.schedule().max_attempts, Some(10));
    }
}
