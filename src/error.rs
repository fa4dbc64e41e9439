//! # Error Handling
//!
//! Every handler returns [`AppResult`]. Errors render as `{"detail": "<message>"}`,
//! the shape the browser client already parses.
//!
//! ## Status Code Mapping:
//! - **BadRequest** → 400 (missing, empty or oversized upload)
//! - **NotFound** → 404
//! - **Transcode**, **Analysis**, **Internal** → 500
//!
//! Detail text is passed through unsanitized so the client sees FFmpeg's
//! stderr and the upstream API's error body.

use crate::audio::TranscodeError;
use crate::prosody::ProsodyError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    /// Uploaded audio could not be converted.
    Transcode(TranscodeError),
    /// Submit, poll or fetch failed.
    Analysis(ProsodyError),
    /// Framework-level failure that never reached a typed handler error.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "{}", msg),
            AppError::NotFound(msg) => write!(f, "{}", msg),
            AppError::Transcode(err) => write!(f, "Audio processing failed: {}", err),
            AppError::Analysis(err) => write!(f, "{}", err),
            AppError::Internal(msg) => write!(f, "Internal server error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Transcode(_)
            | AppError::Analysis(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "detail": self.to_string()
        }))
    }
}

impl From<TranscodeError> for AppError {
    fn from(err: TranscodeError) -> Self {
        AppError::Transcode(err)
    }
}

impl From<ProsodyError> for AppError {
    fn from(err: ProsodyError) -> Self {
        AppError::Analysis(err)
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
