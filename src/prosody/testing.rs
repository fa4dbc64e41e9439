//! In-memory stand-ins for the prosody API and the clock.

use crate::audio::WavAudio;
use crate::prosody::error::ProsodyError;
use crate::prosody::hume::ProsodyApi;
use crate::prosody::job::{JobStatus, JobStatusReport};
use crate::prosody::poll::Clock;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Clock that only moves when slept on.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.offset.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Scripted API. Status responses are served in order; once the script
/// runs out the last one repeats.
pub struct FakeApi {
    statuses: Mutex<VecDeque<Result<JobStatusReport, ProsodyError>>>,
    repeat: Mutex<Option<JobStatusReport>>,
    submit_error: Option<String>,
    predictions: Value,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
    predictions_fetched: AtomicBool,
}

impl FakeApi {
    pub fn new(statuses: Vec<Result<JobStatusReport, ProsodyError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            repeat: Mutex::new(None),
            submit_error: None,
            predictions: json!([]),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            predictions_fetched: AtomicBool::new(false),
        }
    }

    /// Answer every status check with `report`.
    pub fn repeating(report: JobStatusReport) -> Self {
        let api = Self::new(Vec::new());
        *api.repeat.lock().unwrap() = Some(report);
        api
    }

    pub fn with_predictions(mut self, predictions: Value) -> Self {
        self.predictions = predictions;
        self
    }

    pub fn failing_submit(mut self, detail: &str) -> Self {
        self.submit_error = Some(detail.to_string());
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn predictions_fetched(&self) -> bool {
        self.predictions_fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProsodyApi for FakeApi {
    async fn submit_job(&self, _audio: &WavAudio) -> Result<String, ProsodyError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        match &self.submit_error {
            Some(detail) => Err(ProsodyError::Submit(detail.clone())),
            None => Ok("job-123".to_string()),
        }
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatusReport, ProsodyError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        match next {
            Some(Ok(report)) => {
                *self.repeat.lock().unwrap() = Some(report.clone());
                Ok(report)
            }
            Some(Err(err)) => Err(err),
            None => Ok(self
                .repeat
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| JobStatusReport::new(JobStatus::Running))),
        }
    }

    async fn predictions(&self, _job_id: &str) -> Result<Value, ProsodyError> {
        self.predictions_fetched.store(true, Ordering::SeqCst);
        Ok(self.predictions.clone())
    }
}
