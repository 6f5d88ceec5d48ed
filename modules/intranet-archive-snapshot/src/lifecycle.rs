//! Local snapshot housekeeping.
//!
//! Published snapshots are removed right after upload, so anything left under
//! the snapshot root is a failed or timed-out capture kept for inspection.

use std::path::Path;

use chrono::NaiveDate;
use tracing::{info, warn};

use intranet_archive_common::Result;

pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

/// Remove `{root}/{agencyFolder}/{YYYY-MM-DD}` directories dated
/// `max_age_days` or more before `today`. A capture started at 00:00 UTC on
/// that date is already past the window by the time the daily sweep runs. Folders whose names are not dates are
/// kept. Returns how many snapshots were removed.
pub async fn delete_old_snapshots(root: &Path, max_age_days: i64, today: NaiveDate) -> Result<usize> {
    let mut agencies = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    while let Some(agency) = agencies.next_entry().await? {
        if !agency.file_type().await?.is_dir() {
            continue;
        }
        let mut snapshots = tokio::fs::read_dir(agency.path()).await?;
        while let Some(snapshot) = snapshots.next_entry().await? {
            let name = snapshot.file_name();
            let Some(date) = name
                .to_str()
                .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if (today - date).num_days() < max_age_days {
                continue;
            }
            match tokio::fs::remove_dir_all(snapshot.path()).await {
                Ok(()) => {
                    info!(path = %snapshot.path().display(), "Deleted old local snapshot");
                    removed += 1;
                }
                Err(e) => warn!(path = %snapshot.path().display(), error = %e, "Failed to delete old local snapshot"),
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn removes_only_dated_folders_past_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for rel in [
            "dev-hq/2024-01-01/index.html",
            "dev-hq/2024-01-10/index.html",
            "dev-hq/2024-01-11/index.html",
            "dev-hq/2024-01-17/index.html",
            "hq/scratch/notes.txt",
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "x").unwrap();
        }

        let today = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
        let removed = delete_old_snapshots(root, DEFAULT_MAX_AGE_DAYS, today).await.unwrap();

        assert_eq!(removed, 2);
        assert!(!root.join("dev-hq/2024-01-01").exists());
        // seven calendar days old is past the window, six is not
        assert!(!root.join("dev-hq/2024-01-10").exists());
        assert!(root.join("dev-hq/2024-01-11").exists());
        assert!(root.join("dev-hq/2024-01-17").exists());
        assert!(root.join("hq/scratch").exists());
    }

    #[tokio::test]
    async fn missing_root_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
        assert_eq!(
            delete_old_snapshots(&dir.path().join("nope"), 7, today).await.unwrap(),
            0
        );
    }
}
