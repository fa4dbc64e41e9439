//! # FFmpeg Transcoding
//!
//! Converts uploaded WebM audio into the canonical format the prosody API
//! expects: mono, 16-bit little-endian PCM, 44.1 kHz WAV.
//!
//! FFmpeg runs as an async child process, so a slow conversion only occupies
//! a semaphore permit and never the worker's executor thread. The permit count
//! bounds how many FFmpeg processes run at once.

use crate::audio::wav::{WavAudio, WavError, TARGET_SAMPLE_RATE};
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub enum TranscodeError {
    /// FFmpeg exited unsuccessfully; carries its stderr verbatim.
    Failed(String),
    /// The FFmpeg binary could not be started.
    Unavailable(String),
    TimedOut(Duration),
    Io(io::Error),
    Wav(WavError),
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::Failed(stderr) => write!(f, "FFmpeg conversion failed: {}", stderr),
            TranscodeError::Unavailable(msg) => write!(f, "FFmpeg is not available: {}", msg),
            TranscodeError::TimedOut(limit) => {
                write!(f, "FFmpeg conversion timed out after {}s", limit.as_secs())
            }
            TranscodeError::Io(err) => write!(f, "Temp file error: {}", err),
            TranscodeError::Wav(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TranscodeError {}

impl From<io::Error> for TranscodeError {
    fn from(err: io::Error) -> Self {
        TranscodeError::Io(err)
    }
}

impl From<WavError> for TranscodeError {
    fn from(err: WavError) -> Self {
        TranscodeError::Wav(err)
    }
}

/// Anything that turns uploaded container bytes into canonical WAV.
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn to_wav(&self, input: &[u8]) -> Result<WavAudio, TranscodeError>;
}

/// Scratch file removed when dropped. Removal is best-effort and logged.
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Reserve a unique `tmp<uuid>.<extension>` path in `dir`.
    pub fn new(dir: &Path, extension: &str) -> Self {
        let name = format!("tmp{}.{}", Uuid::new_v4().simple(), extension);
        Self { path: dir.join(name) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(file = %self.path.display(), "Cleaned up temporary file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %self.path.display(), error = %e, "Failed to clean up temporary file"),
        }
    }
}

/// FFmpeg argument list: overwrite, drop video, PCM s16le, 44.1 kHz, mono.
pub fn ffmpeg_args(input: &Path, output: &Path) -> Vec<OsString> {
    let sample_rate = TARGET_SAMPLE_RATE.to_string();
    let mut args: Vec<OsString> = Vec::with_capacity(12);
    args.push("-y".into());
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.push("-vn".into());
    args.push("-acodec".into());
    args.push("pcm_s16le".into());
    args.push("-ar".into());
    args.push(sample_rate.into());
    args.push("-ac".into());
    args.push("1".into());
    args.push(output.as_os_str().to_owned());
    args
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    temp_dir: PathBuf,
    permits: Semaphore,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: String, temp_dir: PathBuf, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            ffmpeg_path,
            temp_dir,
            permits: Semaphore::new(max_concurrent.max(1)),
            timeout,
        }
    }

    /// `ffmpeg -version` first line, or the reason it could not run.
    pub async fn probe(ffmpeg_path: &str) -> Result<String, String> {
        let output = Command::new(ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("ffmpeg")
            .to_string())
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn to_wav(&self, input: &[u8]) -> Result<WavAudio, TranscodeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| TranscodeError::Unavailable(e.to_string()))?;

        let started = Instant::now();
        let webm = TempFile::new(&self.temp_dir, "webm");
        let wav_out = TempFile::new(&self.temp_dir, "wav");

        tokio::fs::write(webm.path(), input).await?;
        debug!(bytes = input.len(), file = %webm.path().display(), "Saved upload to temp file");

        let args = ffmpeg_args(webm.path(), wav_out.path());
        info!(command = %self.ffmpeg_path, args = ?args, "Running FFmpeg");

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(error = %e, "FFmpeg could not be started");
                return Err(TranscodeError::Unavailable(e.to_string()));
            }
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "FFmpeg timed out");
                return Err(TranscodeError::TimedOut(self.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!(status = ?output.status.code(), stderr = %stderr, "FFmpeg error");
            return Err(TranscodeError::Failed(stderr));
        }

        let audio = WavAudio::from_path(wav_out.path()).await?;
        info!(
            duration_secs = audio.duration_secs(),
            wav_bytes = audio.len_bytes(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Audio converted"
        );
        Ok(audio)
    }
}
