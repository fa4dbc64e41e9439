//! # Prosody Analyzer
//!
//! Submit, poll and fetch, glued together with per-phase timing.

use crate::audio::WavAudio;
use crate::prosody::error::ProsodyError;
use crate::prosody::hume::ProsodyApi;
use crate::prosody::poll::{poll_until_complete, Clock, PollSchedule};
use crate::prosody::predictions::{extract_emotions, EmotionScore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Seconds spent in each phase of one analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AnalysisTiming {
    pub submit: f64,
    pub poll: f64,
    pub predict: f64,
    pub total: f64,
}

impl AnalysisTiming {
    fn new(submit: f64, poll: f64, predict: f64) -> Self {
        Self {
            submit,
            poll,
            predict,
            total: submit + poll + predict,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub emotions: Vec<EmotionScore>,
    /// Audio length in seconds.
    pub duration: f64,
    pub timing: AnalysisTiming,
    pub job_id: String,
    pub poll_attempts: u32,
}

pub struct ProsodyAnalyzer {
    api: Arc<dyn ProsodyApi>,
    clock: Arc<dyn Clock>,
    schedule: PollSchedule,
    rng_seed: Option<u64>,
}

impl ProsodyAnalyzer {
    pub fn new(api: Arc<dyn ProsodyApi>, clock: Arc<dyn Clock>, schedule: PollSchedule) -> Self {
        Self {
            api,
            clock,
            schedule,
            rng_seed: None,
        }
    }

    /// Use a fixed jitter seed instead of entropy.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    pub async fn analyze_file(&self, path: &Path) -> Result<AnalysisResult, ProsodyError> {
        let audio = WavAudio::from_path(path).await?;
        self.analyze(&audio).await
    }

    #[instrument(skip_all, fields(duration_secs = audio.duration_secs()))]
    pub async fn analyze(&self, audio: &WavAudio) -> Result<AnalysisResult, ProsodyError> {
        let duration = audio.duration_secs();
        let mut rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let started = self.clock.now();
        let job_id = self.api.submit_job(audio).await?;
        let submitted = self.clock.now();

        let state = poll_until_complete(
            self.api.as_ref(),
            self.clock.as_ref(),
            &self.schedule,
            &mut rng,
            &job_id,
            duration,
        )
        .await?;
        let polled = self.clock.now();

        let predictions = self.api.predictions(&job_id).await?;
        let emotions = extract_emotions(&predictions);
        let fetched = self.clock.now();

        let timing = AnalysisTiming::new(
            secs_between(started, submitted),
            secs_between(submitted, polled),
            secs_between(polled, fetched),
        );

        info!(
            job_id = %job_id,
            emotions = emotions.len(),
            attempts = state.attempts,
            total_secs = timing.total,
            "Prosody analysis finished"
        );

        Ok(AnalysisResult {
            emotions,
            duration,
            timing,
            job_id,
            poll_attempts: state.attempts,
        })
    }
}

fn secs_between(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_secs_f64()
}
