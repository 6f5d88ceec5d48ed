//! Crawl progress inferred from the artifacts the mirroring tool leaves in its
//! output directory.
//!
//! `complete` holds exactly when the index artifact exists and the lock
//! artifact does not.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveTime, Timelike};
use tracing::info;

use intranet_archive_common::{ArchiveError, Result};

use crate::httrack::{INDEX_FILE, LOCK_FILE, PROGRESS_LOG};

/// Window, in seconds, over which the recent request rate is measured.
const RATE_WINDOW_SECS: u32 = 5;

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '$', '`', '<', '>', '\n'];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub requests: usize,
    /// Requests per second over the last few seconds.
    pub rate: f64,
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub poll_interval: Duration,
    /// Budget for the progress log to appear after launch.
    pub start_timeout: Duration,
    /// Polls that each log a heartbeat before switching to `heartbeat_every`.
    pub warmup_heartbeats: u64,
    pub heartbeat_every: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            start_timeout: Duration::from_secs(120),
            warmup_heartbeats: 10,
            heartbeat_every: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    config: WaitConfig,
}

impl ProgressTracker {
    pub fn new(config: WaitConfig) -> Self {
        Self { config }
    }

    pub async fn read_progress(&self, dir: &Path) -> Result<ProgressSnapshot> {
        reject_metacharacters(dir)?;

        let mut now = Local::now().time();
        // The log has no date component: right after midnight the window would
        // straddle two days and every line would look stale.
        if now.num_seconds_from_midnight() < RATE_WINDOW_SECS {
            tokio::time::sleep(Duration::from_secs(RATE_WINDOW_SECS as u64)).await;
            now = Local::now().time();
        }
        read_progress_at(dir, now).await
    }

    /// Poll until the capture finishes or its budget runs out: first for the
    /// progress log to appear, then for the lock to disappear.
    pub async fn wait_for_completion(&self, dir: &Path, timeout: Duration) -> Result<WaitOutcome> {
        reject_metacharacters(dir)?;
        let started = Instant::now();
        let log = dir.join(PROGRESS_LOG);
        let lock = dir.join(LOCK_FILE);

        let start_budget = self.config.start_timeout.min(timeout);
        while !exists(&log).await {
            if started.elapsed() >= start_budget {
                info!(dir = %dir.display(), "Progress log never appeared");
                return Ok(WaitOutcome { timed_out: true });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let heartbeat_period = heartbeat_period(&self.config);
        let mut iteration: u64 = 0;
        loop {
            iteration += 1;
            if iteration <= self.config.warmup_heartbeats || iteration % heartbeat_period == 0 {
                let progress = self.read_progress(dir).await?;
                info!(
                    dir = %dir.display(),
                    requests = progress.requests,
                    rate = progress.rate,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Capture in progress"
                );
            }

            if !exists(&lock).await {
                return Ok(WaitOutcome { timed_out: false });
            }
            if started.elapsed() >= timeout {
                info!(dir = %dir.display(), "Capture exceeded its time budget");
                return Ok(WaitOutcome { timed_out: true });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

fn heartbeat_period(config: &WaitConfig) -> u64 {
    let poll = config.poll_interval.as_millis().max(1);
    ((config.heartbeat_every.as_millis() / poll) as u64).max(1)
}

fn reject_metacharacters(dir: &Path) -> Result<()> {
    let raw = dir.to_string_lossy();
    if raw.contains(SHELL_METACHARACTERS) {
        return Err(ArchiveError::Validation(format!(
            "Path contains shell metacharacters: {raw}"
        )));
    }
    Ok(())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Read progress as of the given local time of day.
pub(crate) async fn read_progress_at(dir: &Path, now: NaiveTime) -> Result<ProgressSnapshot> {
    let complete = exists(&dir.join(INDEX_FILE)).await && !exists(&dir.join(LOCK_FILE)).await;

    // URLs and file names are logged raw and need not be UTF-8.
    let bytes = match tokio::fs::read(dir.join(PROGRESS_LOG)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ProgressSnapshot {
                requests: 0,
                rate: 0.0,
                complete,
            });
        }
        Err(e) => return Err(e.into()),
    };

    let content = String::from_utf8_lossy(&bytes);
    let mut lines = content.lines();
    let _header = lines.next();
    let mut requests = 0usize;
    let mut recent = 0usize;
    let now_secs = now.num_seconds_from_midnight();
    for line in lines {
        requests += 1;
        let stamp = line.split('\t').next().unwrap_or_default().trim();
        if let Ok(time) = NaiveTime::parse_from_str(stamp, "%H:%M:%S") {
            let secs = time.num_seconds_from_midnight();
            if secs <= now_secs && now_secs - secs < RATE_WINDOW_SECS {
                recent += 1;
            }
        }
    }

    Ok(ProgressSnapshot {
        requests,
        rate: recent as f64 / RATE_WINDOW_SECS as f64,
        complete,
    })
}
