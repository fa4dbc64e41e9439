//! # Prosody Analysis
//!
//! Client for the external batch emotion API:
//! - **hume**: HTTP transport behind the [`ProsodyApi`] trait
//! - **job**: job status parsing and the poll transition function
//! - **poll**: fixed and adaptive poll schedules, injected [`Clock`]
//! - **predictions**: emotion list extraction
//! - **analyzer**: submit, poll, fetch with per-phase timing

pub mod analyzer;
pub mod error;
pub mod hume;
pub mod job;
pub mod poll;
pub mod predictions;

#[cfg(test)]
pub(crate) mod testing;

pub use analyzer::{AnalysisTiming, ProsodyAnalyzer};
pub use error::ProsodyError;
pub use hume::HumeClient;
pub use poll::{PollSchedule, TokioClock};
pub use predictions::EmotionScore;
