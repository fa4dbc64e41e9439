//! # Job Lifecycle
//!
//! Typed view of the external job's `state.status` and the transition
//! function the poll loop drives.
//!
//! ```text
//!   Pending ──► Running ──► Completed ──► fetch predictions
//!      │           │
//!      └───────────┴──► Failed | Rejected | Cancelled ──► error
//!
//!   anything else ──► Unknown ──► error
//! ```

use crate::prosody::error::ProsodyError;
use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Rejected,
    Cancelled,
    Unknown(String),
}

impl JobStatus {
    /// Parse the wire value. Matching is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => JobStatus::Pending,
            "RUNNING" | "IN_PROGRESS" => JobStatus::Running,
            "COMPLETED" => JobStatus::Completed,
            "FAILED" => JobStatus::Failed,
            "REJECTED" => JobStatus::Rejected,
            "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
            _ => JobStatus::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Rejected => "REJECTED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status response from the API.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusReport {
    pub status: JobStatus,
    /// Percent complete, when the API reports it.
    pub progress: Option<f64>,
    pub message: Option<String>,
}

impl JobStatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            message: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Wire shape of `GET /jobs/{id}`; only the fields we read.
#[derive(Debug, Deserialize)]
pub(crate) struct JobStatusBody {
    pub state: JobStateBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobStateBody {
    pub status: String,
    #[serde(default, alias = "progress_percent")]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl From<JobStatusBody> for JobStatusReport {
    fn from(body: JobStatusBody) -> Self {
        Self {
            status: JobStatus::parse(&body.state.status),
            progress: body.state.progress,
            message: body.state.message,
        }
    }
}

/// What the poll loop does next.
#[derive(Debug)]
pub enum PollTransition {
    KeepPolling,
    FetchPredictions,
    Fail(ProsodyError),
}

pub fn transition(report: &JobStatusReport) -> PollTransition {
    match &report.status {
        JobStatus::Pending | JobStatus::Running => PollTransition::KeepPolling,
        JobStatus::Completed => PollTransition::FetchPredictions,
        status @ (JobStatus::Failed | JobStatus::Rejected | JobStatus::Cancelled) => {
            PollTransition::Fail(ProsodyError::JobEnded {
                status: status.clone(),
                message: report.message.clone(),
            })
        }
        JobStatus::Unknown(raw) => PollTransition::Fail(ProsodyError::UnknownStatus(raw.clone())),
    }
}

/// Transient bookkeeping for one job while it is being polled.
#[derive(Debug, Clone)]
pub struct PollState {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub attempts: u32,
}

impl PollState {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            progress: None,
            attempts: 0,
        }
    }

    /// Record a status response. Returns true when progress went up.
    pub fn observe(&mut self, report: &JobStatusReport) -> bool {
        self.attempts += 1;
        self.status = report.status.clone();

        let advanced = match (self.progress, report.progress) {
            (Some(before), Some(now)) => now > before,
            (None, Some(now)) => now > 0.0,
            _ => false,
        };
        if let Some(now) = report.progress {
            self.progress = Some(now);
        }
        advanced
    }
}
