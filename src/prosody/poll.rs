//! # Job Polling
//!
//! Drives a submitted job to a terminal state with one of two schedules:
//!
//! - **Fixed**: no initial delay, constant interval, wall-clock timeout only.
//! - **Adaptive**: initial delay scaled by audio length, jittered interval
//!   that shrinks while the job reports progress and grows once it stalls,
//!   an attempt cap on top of the wall-clock timeout.
//!
//! Time comes from a [`Clock`] and jitter from a caller-owned RNG, so the
//! whole loop runs deterministically under test.

use crate::config::PollingConfig;
use crate::prosody::error::ProsodyError;
use crate::prosody::hume::ProsodyApi;
use crate::prosody::job::{transition, PollState, PollTransition};
use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SPEEDUP_FACTOR: f64 = 0.8;
const SLOWDOWN_FACTOR: f64 = 1.2;

/// Multiply to the nearest nanosecond.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::from_nanos((duration.as_nanos() as f64 * factor).round() as u64)
}

/// Source of time for the poll loop.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Real time backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStrategy {
    Fixed,
    Adaptive,
}

impl PollStrategy {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(PollStrategy::Fixed),
            "adaptive" => Ok(PollStrategy::Adaptive),
            other => bail!("Unknown poll strategy '{}' (expected 'fixed' or 'adaptive')", other),
        }
    }
}

/// Timing rules for one poll loop.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    pub strategy: PollStrategy,
    pub timeout: Duration,
    pub fixed_interval: Duration,
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub min_initial_delay: Duration,
    pub max_initial_delay: Duration,
    pub initial_delay_per_audio_sec: Duration,
    pub jitter_ratio: f64,
    pub max_attempts: Option<u32>,
    pub stall_attempts: u32,
}

impl PollSchedule {
    pub fn from_config(config: &PollingConfig) -> Result<Self> {
        let strategy = PollStrategy::parse(&config.strategy)?;
        let ms = Duration::from_millis;
        Ok(Self {
            strategy,
            timeout: Duration::from_secs(config.timeout_secs),
            fixed_interval: ms(config.fixed_interval_ms),
            base_interval: ms(config.base_interval_ms),
            min_interval: ms(config.min_interval_ms),
            max_interval: ms(config.max_interval_ms),
            min_initial_delay: ms(config.min_initial_delay_ms),
            max_initial_delay: ms(config.max_initial_delay_ms),
            initial_delay_per_audio_sec: ms(config.initial_delay_per_audio_sec_ms),
            jitter_ratio: config.jitter_ratio,
            max_attempts: match strategy {
                PollStrategy::Fixed => None,
                PollStrategy::Adaptive => Some(config.max_attempts),
            },
            stall_attempts: config.stall_attempts,
        })
    }

    /// Wait before the first status check.
    pub fn initial_delay(&self, audio_secs: f64) -> Duration {
        match self.strategy {
            PollStrategy::Fixed => Duration::ZERO,
            PollStrategy::Adaptive => {
                let min_ms = self.min_initial_delay.as_millis() as f64;
                let max_ms = self.max_initial_delay.as_millis() as f64;
                let per_sec_ms = self.initial_delay_per_audio_sec.as_millis() as f64;
                let scaled = min_ms + per_sec_ms * audio_secs.max(0.0);
                Duration::from_millis(scaled.clamp(min_ms, max_ms.max(min_ms)).round() as u64)
            }
        }
    }

    pub fn first_interval(&self) -> Duration {
        match self.strategy {
            PollStrategy::Fixed => self.fixed_interval,
            PollStrategy::Adaptive => self.clamp_interval(self.base_interval),
        }
    }

    /// Interval after a status check. `advanced` is whether progress went up;
    /// `attempts` counts checks made so far.
    pub fn next_interval(&self, current: Duration, advanced: bool, attempts: u32) -> Duration {
        match self.strategy {
            PollStrategy::Fixed => self.fixed_interval,
            PollStrategy::Adaptive => {
                let next = if advanced {
                    scale(current, SPEEDUP_FACTOR)
                } else if attempts >= self.stall_attempts {
                    scale(current, SLOWDOWN_FACTOR)
                } else {
                    current
                };
                self.clamp_interval(next)
            }
        }
    }

    /// Sleep length for `interval` with jitter applied. Fixed schedules are
    /// never jittered.
    pub fn jittered<R: Rng>(&self, interval: Duration, rng: &mut R) -> Duration {
        if self.strategy == PollStrategy::Fixed || self.jitter_ratio <= 0.0 {
            return interval;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter_ratio..=self.jitter_ratio);
        scale(interval, factor)
    }

    fn clamp_interval(&self, interval: Duration) -> Duration {
        interval.clamp(self.min_interval, self.max_interval)
    }
}

/// Poll `job_id` until it completes, fails, or the schedule runs out.
///
/// Returns the final state on `Completed`. Terminal failures, unknown
/// statuses, transport errors, timeout and the attempt cap are errors.
pub async fn poll_until_complete<R: Rng + Send>(
    api: &dyn ProsodyApi,
    clock: &dyn Clock,
    schedule: &PollSchedule,
    rng: &mut R,
    job_id: &str,
    audio_secs: f64,
) -> Result<PollState, ProsodyError> {
    let started = clock.now();
    let mut state = PollState::new(job_id);

    let initial = schedule.initial_delay(audio_secs);
    if !initial.is_zero() {
        debug!(job_id, delay_ms = initial.as_millis() as u64, "Waiting before first status check");
        clock.sleep(initial).await;
    }

    let mut interval = schedule.first_interval();

    loop {
        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed >= schedule.timeout {
            warn!(job_id, elapsed_secs = elapsed.as_secs_f64(), "Polling timed out");
            return Err(ProsodyError::TimedOut {
                elapsed,
                attempts: state.attempts,
            });
        }

        let report = api.job_status(job_id).await?;
        let advanced = state.observe(&report);
        debug!(
            job_id,
            attempt = state.attempts,
            status = %report.status,
            progress = ?report.progress,
            "Job status"
        );

        match transition(&report) {
            PollTransition::KeepPolling => {}
            PollTransition::FetchPredictions => {
                info!(
                    job_id,
                    attempts = state.attempts,
                    elapsed_secs = clock.now().saturating_duration_since(started).as_secs_f64(),
                    "Job completed"
                );
                return Ok(state);
            }
            PollTransition::Fail(err) => {
                warn!(job_id, error = %err, "Job ended without results");
                return Err(err);
            }
        }

        if let Some(max_attempts) = schedule.max_attempts {
            if state.attempts >= max_attempts {
                let elapsed = clock.now().saturating_duration_since(started);
                warn!(job_id, attempts = state.attempts, "Poll attempt cap reached");
                return Err(ProsodyError::TimedOut {
                    elapsed,
                    attempts: state.attempts,
                });
            }
        }

        interval = schedule.next_interval(interval, advanced, state.attempts);
        clock.sleep(schedule.jittered(interval, rng)).await;
    }
}
