//! # Temp File Hygiene
//!
//! The transcoder names its scratch files `tmp<uuid>.webm` / `tmp<uuid>.wav`.
//! Normal requests remove their own files, but a crash or a killed worker can
//! leave some behind. Sweeps run at startup, on a timer, and on shutdown.

use crate::audio::header::SessionHeaderStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Name pattern of the transcoder's scratch files.
pub fn is_temp_audio_file(name: &str) -> bool {
    name.starts_with("tmp") && (name.ends_with(".wav") || name.ends_with(".webm"))
}

/// Remove matching files in `dir`. With `older_than`, files modified more
/// recently are kept.
pub fn sweep_temp_files(dir: &Path, older_than: Option<Duration>) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!(dir = %dir.display(), error = %e, "Error listing temp directory");
            return report;
        }
    };

    let now = SystemTime::now();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_temp_audio_file(name) {
            continue;
        }

        let Ok(metadata) = entry.metadata() else { continue };
        if !metadata.is_file() {
            continue;
        }

        if let Some(min_age) = older_than {
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < min_age {
                continue;
            }
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                info!(file = name, "Cleaned up leftover temp file");
                report.removed += 1;
            }
            Err(e) => {
                error!(file = name, error = %e, "Error cleaning up temp file");
                report.failed += 1;
            }
        }
    }

    report
}

/// Sweep on the blocking pool so large directories never stall a worker.
pub async fn sweep_temp_files_async(dir: PathBuf, older_than: Option<Duration>) -> SweepReport {
    match tokio::task::spawn_blocking(move || sweep_temp_files(&dir, older_than)).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Temp sweep task failed");
            SweepReport::default()
        }
    }
}

/// Periodically sweep stale temp files and expire idle header sessions.
pub fn spawn_periodic_sweeper(
    dir: PathBuf,
    interval: Duration,
    stale_after: Duration,
    headers: Arc<SessionHeaderStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            warn!("Periodic temp sweep disabled (interval is 0)");
            return;
        }

        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; startup already swept.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = sweep_temp_files_async(dir.clone(), Some(stale_after)).await;
            let expired = headers.evict_stale();
            debug!(
                removed = report.removed,
                failed = report.failed,
                expired_sessions = expired,
                "Periodic sweep finished"
            );
        }
    })
}
