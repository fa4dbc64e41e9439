//! Decoded WAV audio held in memory.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use tracing::warn;
use wav::BitDepth;

/// Sample rate the transcoder produces.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug)]
pub enum WavError {
    Io(std::io::Error),
    Decode(String),
}

impl fmt::Display for WavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WavError::Io(err) => write!(f, "Failed to read WAV file: {}", err),
            WavError::Decode(msg) => write!(f, "Invalid WAV data: {}", msg),
        }
    }
}

impl std::error::Error for WavError {}

/// WAV bytes plus the format facts needed downstream.
#[derive(Debug, Clone)]
pub struct WavAudio {
    bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frames: usize,
}

impl WavAudio {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, WavError> {
        let (header, data) =
            wav::read(&mut Cursor::new(&bytes)).map_err(|e| WavError::Decode(e.to_string()))?;

        if header.sampling_rate == 0 || header.channel_count == 0 {
            return Err(WavError::Decode(format!(
                "unusable format: {} Hz, {} channel(s)",
                header.sampling_rate, header.channel_count
            )));
        }

        let samples = match &data {
            BitDepth::Eight(s) => s.len(),
            BitDepth::Sixteen(s) => s.len(),
            BitDepth::TwentyFour(s) => s.len(),
            BitDepth::ThirtyTwoFloat(s) => s.len(),
            BitDepth::Empty => 0,
        };

        if header.channel_count != 1 {
            warn!(channels = header.channel_count, "WAV file has multiple channels");
        }
        if header.bits_per_sample != 16 {
            warn!(bits = header.bits_per_sample, "WAV sample width should be 16-bit");
        }

        Ok(Self {
            bytes,
            sample_rate: header.sampling_rate,
            channels: header.channel_count,
            bits_per_sample: header.bits_per_sample,
            frames: samples / header.channel_count as usize,
        })
    }

    pub async fn from_path(path: &Path) -> Result<Self, WavError> {
        let bytes = tokio::fs::read(path).await.map_err(WavError::Io)?;
        Self::from_bytes(bytes)
    }

    /// Length in seconds: frame count divided by frame rate.
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }
}
