use crate::audio::wav::WavError;
use crate::prosody::job::JobStatus;
use std::fmt;
use std::time::Duration;

/// Message shown instead of an upstream gateway error page.
pub const UPSTREAM_RETRY_MESSAGE: &str =
    "The emotion analysis service is temporarily unavailable. Please try again in a few seconds.";

/// Failures of the submit / poll / fetch sequence.
#[derive(Debug)]
pub enum ProsodyError {
    /// The HTTP request itself failed (DNS, TLS, connection reset, client timeout).
    Transport(String),
    Submit(String),
    Status(String),
    Predictions(String),
    /// A 200 response whose body did not match the job contract.
    InvalidResponse(String),
    /// The job reached Failed, Rejected or Cancelled.
    JobEnded {
        status: JobStatus,
        message: Option<String>,
    },
    UnknownStatus(String),
    TimedOut {
        elapsed: Duration,
        attempts: u32,
    },
    Audio(WavError),
}

impl fmt::Display for ProsodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProsodyError::Transport(msg) => write!(f, "Request to prosody API failed: {}", msg),
            ProsodyError::Submit(body) => write!(f, "Failed to submit job: {}", body),
            ProsodyError::Status(body) => write!(f, "Failed to get job status: {}", body),
            ProsodyError::Predictions(body) => write!(f, "Failed to get predictions: {}", body),
            ProsodyError::InvalidResponse(msg) => {
                write!(f, "Unexpected response from prosody API: {}", msg)
            }
            ProsodyError::JobEnded { status, message } => {
                let verb = match status {
                    JobStatus::Rejected => "was rejected",
                    JobStatus::Cancelled => "was cancelled",
                    _ => "failed",
                };
                match message {
                    Some(message) => write!(f, "Prosody analysis job {}: {}", verb, message),
                    None => write!(f, "Prosody analysis job {}", verb),
                }
            }
            ProsodyError::UnknownStatus(raw) => write!(f, "Unknown job status: {}", raw),
            ProsodyError::TimedOut { elapsed, attempts } => write!(
                f,
                "Job timed out after {:.1} seconds ({} status checks)",
                elapsed.as_secs_f64(),
                attempts
            ),
            ProsodyError::Audio(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ProsodyError {}

impl From<reqwest::Error> for ProsodyError {
    fn from(err: reqwest::Error) -> Self {
        ProsodyError::Transport(err.to_string())
    }
}

impl From<WavError> for ProsodyError {
    fn from(err: WavError) -> Self {
        ProsodyError::Audio(err)
    }
}

/// Turn an error response body into error detail.
///
/// Gateway failures in front of the API come back as HTML pages (for example
/// "502 Bad Gateway"). Those are replaced by a short retry message; any other
/// body is passed through verbatim.
pub fn describe_upstream_body(status: u16, body: &str) -> String {
    let lower = body.to_ascii_lowercase();
    let is_html = lower.contains("<html") || lower.contains("<!doctype html");
    let gateway_status = matches!(status, 502..=504);
    let gateway_page = lower.contains("bad gateway")
        || lower.contains("gateway time-out")
        || lower.contains("gateway timeout")
        || lower.contains("error code 502")
        || lower.contains("error code 504");

    if is_html && (gateway_status || gateway_page) {
        return UPSTREAM_RETRY_MESSAGE.to_string();
    }

    if body.trim().is_empty() {
        return format!("HTTP {}", status);
    }

    body.to_string()
}
