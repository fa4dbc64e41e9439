//! # Audio Ingestion and Transcoding
//!
//! Everything between the raw upload and a canonical WAV clip:
//! - **header**: per-session WebM header cache for headerless streamed chunks
//! - **transcoder**: FFmpeg conversion to mono 16-bit 44.1 kHz WAV
//! - **wav**: in-memory WAV decoding and duration
//! - **cleanup**: sweeps of leftover `tmp*.wav` / `tmp*.webm` files

pub mod cleanup;
pub mod header;
pub mod transcoder;
pub mod wav;

pub use header::SessionHeaderStore;
pub use transcoder::{AudioTranscoder, FfmpegTranscoder, TranscodeError};
pub use wav::WavAudio;
