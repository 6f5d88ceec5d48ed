//! Background work owned by the server process: the capture schedule and the
//! daily local-snapshot cleanup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use intranet_archive_snapshot::{
    delete_old_snapshots, ScheduleEntry, Scheduler, SnapshotJob, SnapshotPipeline,
    DEFAULT_MAX_AGE_DAYS,
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Run a snapshot job detached. Failures are logged by the pipeline.
pub fn spawn_job(pipeline: Arc<SnapshotPipeline>, job: SnapshotJob) {
    tokio::spawn(async move {
        let _ = pipeline.run(&job).await;
    });
}

pub fn spawn_schedule(pipeline: Arc<SnapshotPipeline>, entries: Vec<ScheduleEntry>) {
    if entries.is_empty() {
        info!("No snapshot schedule configured");
        return;
    }
    for entry in &entries {
        info!(
            env = %entry.environment,
            agency = %entry.agency,
            days = ?entry.days,
            hour = entry.hour,
            min = entry.min,
            depth = ?entry.depth,
            "Scheduled snapshot"
        );
    }
    tokio::spawn(Scheduler::new(entries).run(move |entry| {
        spawn_job(
            pipeline.clone(),
            SnapshotJob::new(entry.environment, entry.agency, entry.depth),
        );
    }));
}

/// Delete stale local snapshots now and then once a day.
pub fn spawn_cleanup(root: PathBuf) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match delete_old_snapshots(&root, DEFAULT_MAX_AGE_DAYS, Utc::now().date_naive()).await {
                Ok(removed) => info!(removed, root = %root.display(), "Local snapshot cleanup finished"),
                Err(e) => warn!(error = %e, root = %root.display(), "Local snapshot cleanup failed"),
            }
        }
    });
}
