//! One snapshot job end to end:
//! CHECK_EXISTING → CAPTURE? → SCRUB → SYNC → CLEAN_LOCAL → REINDEX.
//!
//! Sensitive artifacts are deleted before anything is uploaded, and a capture
//! that exceeds its budget aborts the job before SCRUB so a partial mirror is
//! never published.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use intranet_archive_common::{ArchiveError, Result};

use crate::httrack::{
    build_arguments, CaptureLauncher, CapturePlan, CaptureSettings, CaptureTarget, INDEX_FILE,
    LOCK_FILE, SENSITIVE_FILES,
};
use crate::indexes::{publish_agency_index, publish_root_index};
use crate::paths::{PathResolver, SnapshotPaths};
use crate::progress::{ProgressTracker, WaitConfig};
use crate::retry::{retry, RetryOptions, RetryState};
use crate::storage::{ObjectStore, PutOptions};
use crate::sync::{sync_directory, SyncReport};

#[derive(Debug, Clone)]
pub struct SnapshotJob {
    pub environment: String,
    pub agency: String,
    pub depth: Option<u32>,
    pub started_at: DateTime<Utc>,
}

impl SnapshotJob {
    pub fn new(environment: impl Into<String>, agency: impl Into<String>, depth: Option<u32>) -> Self {
        Self {
            environment: environment.into(),
            agency: agency.into(),
            depth,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Capturing,
    TimedOut,
    Captured,
    Publishing,
    Published,
    Failed,
}

pub struct PipelineSettings {
    pub capture: CaptureSettings,
    pub wait: WaitConfig,
    pub capture_timeout: Duration,
    /// `Cache-Control: max-age` of the regenerated index documents.
    pub index_max_age_secs: u64,
    /// Probed by the intranet's heartbeat script through the CDN.
    pub heartbeat_key: String,
    /// Wraps heartbeat, SYNC and each REINDEX write.
    pub retry: RetryOptions<ArchiveError>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            wait: WaitConfig::default(),
            capture_timeout: Duration::from_secs(6 * 60 * 60),
            index_max_age_secs: 600,
            heartbeat_key: "auth/heartbeat".to_string(),
            retry: RetryOptions::default()
                .retry_if(|s: &RetryState<'_, ArchiveError>| s.index < 10 && s.error.is_transient()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub storage_key: String,
    /// False when a complete capture was already on disk.
    pub captured: bool,
    pub sync: SyncReport,
    /// Dates listed in the regenerated agency index.
    pub snapshots: Vec<String>,
    pub status: JobStatus,
}

pub struct SnapshotPipeline {
    resolver: PathResolver,
    launcher: Arc<dyn CaptureLauncher>,
    store: Arc<dyn ObjectStore>,
    tracker: ProgressTracker,
    settings: PipelineSettings,
}

impl SnapshotPipeline {
    pub fn new(
        resolver: PathResolver,
        launcher: Arc<dyn CaptureLauncher>,
        store: Arc<dyn ObjectStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver,
            launcher,
            store,
            tracker: ProgressTracker::new(settings.wait.clone()),
            settings,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run the job against today's (UTC) snapshot paths.
    pub async fn run(&self, job: &SnapshotJob) -> Result<PublishReport> {
        self.run_on(job, Utc::now().date_naive()).await
    }

    pub async fn run_on(&self, job: &SnapshotJob, date: NaiveDate) -> Result<PublishReport> {
        let env = job.environment.as_str();
        let agency = job.agency.as_str();
        let paths = self.resolver.snapshot_paths_on(env, agency, date)?;
        let mut status = JobStatus::Pending;
        info!(env, agency, depth = ?job.depth, key = %paths.storage_key, "Snapshot job started");

        let result = self.execute(job, &paths, &mut status).await;
        match &result {
            Ok(report) => info!(
                env,
                agency,
                key = %report.storage_key,
                uploaded = report.sync.uploaded,
                elapsed_secs = (Utc::now() - job.started_at).num_seconds(),
                "Snapshot published"
            ),
            Err(e) => warn!(env, agency, status = ?status, error = %e, "Snapshot job failed"),
        }
        result
    }

    async fn execute(
        &self,
        job: &SnapshotJob,
        paths: &SnapshotPaths,
        status: &mut JobStatus,
    ) -> Result<PublishReport> {
        let env = job.environment.as_str();
        let agency = job.agency.as_str();
        let dir = paths.local_dir.as_path();

        // ---- CHECK_EXISTING ----
        let existing = self.tracker.read_progress(dir).await?;
        let captured = if existing.complete {
            info!(env, agency, "Complete capture already on disk, skipping capture");
            false
        } else {
            if tokio::fs::try_exists(dir.join(LOCK_FILE)).await.unwrap_or(false) {
                warn!(env, agency, dir = %dir.display(), "Lock artifact already present, another capture may be running");
            }
            *status = JobStatus::Capturing;
            if let Err(e) = self.capture(job, dir).await {
                if matches!(e, ArchiveError::Timeout(_)) {
                    *status = JobStatus::TimedOut;
                } else {
                    *status = JobStatus::Failed;
                }
                return Err(e);
            }
            true
        };
        *status = JobStatus::Captured;

        // ---- SCRUB ----
        scrub(dir).await?;

        // ---- SYNC ----
        *status = JobStatus::Publishing;
        let published = self.publish(env, agency, paths).await;
        let (sync, snapshots) = match published {
            Ok(done) => done,
            Err(e) => {
                *status = JobStatus::Failed;
                return Err(e);
            }
        };

        *status = JobStatus::Published;
        Ok(PublishReport {
            storage_key: paths.storage_key.clone(),
            captured,
            sync,
            snapshots,
            status: *status,
        })
    }

    async fn capture(&self, job: &SnapshotJob, dir: &Path) -> Result<()> {
        let environment = self.resolver.environment(&job.environment)?;
        let environment_index = environment.index_page();
        let target = CaptureTarget {
            url: &environment.base_url,
            dest: dir,
            agency: &job.agency,
            credential: environment.credential.as_deref(),
            depth: job.depth,
            environment_index: &environment_index,
        };
        let plan = CapturePlan {
            args: build_arguments(&target, &self.settings.capture),
            dest: dir.to_path_buf(),
        };

        let mut running = self.launcher.launch(&plan).await?;
        let checked = self.await_capture(job, dir).await;
        if checked.is_err() && running.kill() {
            warn!(env = %job.environment, agency = %job.agency, "Stopped capture process");
        }
        checked
    }

    /// Wait for the capture, then require the same completion predicate that
    /// CHECK_EXISTING uses: index present and lock absent.
    async fn await_capture(&self, job: &SnapshotJob, dir: &Path) -> Result<()> {
        let outcome = self
            .tracker
            .wait_for_completion(dir, self.settings.capture_timeout)
            .await?;
        if outcome.timed_out {
            return Err(ArchiveError::Timeout(format!(
                "{} {} after {}s",
                job.environment,
                job.agency,
                self.settings.capture_timeout.as_secs()
            )));
        }

        let progress = self.tracker.read_progress(dir).await?;
        if !progress.complete {
            return Err(ArchiveError::CaptureIncomplete(format!(
                "{} {}: capture ended without {INDEX_FILE} ({} requests)",
                job.environment, job.agency, progress.requests
            )));
        }
        Ok(())
    }

    async fn publish(
        &self,
        env: &str,
        agency: &str,
        paths: &SnapshotPaths,
    ) -> Result<(SyncReport, Vec<String>)> {
        let store = self.store.as_ref();
        let options = &self.settings.retry;
        let dir = paths.local_dir.as_path();

        retry(|_| ensure_heartbeat(store, &self.settings.heartbeat_key), options).await?;

        let sync = retry(
            |_| sync_directory(store, dir, &paths.storage_key, SENSITIVE_FILES),
            options,
        )
        .await?;

        // ---- CLEAN_LOCAL ----
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "Failed to remove local snapshot");
        }

        // ---- REINDEX ----
        let max_age = self.settings.index_max_age_secs;
        let snapshots = retry(
            |_| publish_agency_index(store, &self.resolver, env, agency, max_age),
            options,
        )
        .await?;
        retry(|_| publish_root_index(store, &self.resolver, env, max_age), options).await?;

        Ok((sync, snapshots))
    }
}

/// Delete every sensitive artifact. Missing files are fine.
async fn scrub(dir: &Path) -> Result<()> {
    for file in SENSITIVE_FILES {
        match tokio::fs::remove_file(dir.join(file)).await {
            Ok(()) => info!(file, "Removed sensitive artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn ensure_heartbeat(store: &dyn ObjectStore, key: &str) -> Result<()> {
    if store.get_object(key).await?.is_some() {
        return Ok(());
    }
    store
        .put_object(key, b"OK".to_vec(), PutOptions::content_type("text/plain"))
        .await?;
    info!(key, "Heartbeat object created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn scrub_removes_only_sensitive_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("hts-cache")).unwrap();
        for f in SENSITIVE_FILES {
            std::fs::write(dir.path().join(f), "secret").unwrap();
        }
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        scrub(dir.path()).await.unwrap();
        for f in SENSITIVE_FILES {
            assert!(!dir.path().join(f).exists(), "{f} survived scrub");
        }
        assert!(dir.path().join("index.html").exists());
        // idempotent
        scrub(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_is_written_once() {
        let store = MemoryStore::new();
        ensure_heartbeat(&store, "auth/heartbeat").await.unwrap();
        ensure_heartbeat(&store, "auth/heartbeat").await.unwrap();
        assert_eq!(store.get("auth/heartbeat").unwrap().body, b"OK");
        assert_eq!(store.put_count(), 1);
    }

    #[test]
    fn default_retry_skips_validation_errors() {
        let settings = PipelineSettings::default();
        let validation = ArchiveError::Validation("agency".into());
        let storage = ArchiveError::Storage("503".into());
        let state = |error| crate::retry::RetryState {
            index: 0,
            elapsed: Duration::ZERO,
            error,
        };
        assert!(!(settings.retry.retry)(&state(&validation)));
        assert!((settings.retry.retry)(&state(&storage)));
    }
}
