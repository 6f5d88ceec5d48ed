//! Where a snapshot lives: the storage key prefix and the local working directory.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};

use intranet_archive_common::{ArchiveError, Environment, EnvironmentSet, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPaths {
    /// `{agencyPath}/{YYYY-MM-DD}` within the bucket.
    pub storage_key: String,
    /// `{snapshot_root}/{storage_key}` on the local filesystem.
    pub local_dir: PathBuf,
}

/// Maps (environment, agency, date) to locations, validating against the allow-lists.
#[derive(Debug, Clone)]
pub struct PathResolver {
    environments: EnvironmentSet,
    agencies: Vec<String>,
    snapshot_root: PathBuf,
}

impl PathResolver {
    pub fn new(
        environments: EnvironmentSet,
        agencies: Vec<String>,
        snapshot_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            environments,
            agencies,
            snapshot_root: snapshot_root.into(),
        }
    }

    pub fn environments(&self) -> &EnvironmentSet {
        &self.environments
    }

    pub fn agencies(&self) -> &[String] {
        &self.agencies
    }

    pub fn snapshot_root(&self) -> &Path {
        &self.snapshot_root
    }

    pub fn is_allowed_agency(&self, agency: &str) -> bool {
        self.agencies.iter().any(|a| a == agency)
    }

    pub fn environment(&self, env: &str) -> Result<&Environment> {
        self.environments
            .get(env)
            .ok_or_else(|| ArchiveError::Validation(format!("Invalid environment: {env}")))
    }

    /// Agency folder in the bucket for an allow-listed agency.
    pub fn agency_path(&self, env: &str, agency: &str) -> Result<String> {
        let environment = self.environment(env)?;
        if !self.is_allowed_agency(agency) {
            return Err(ArchiveError::Validation(format!("Invalid agency: {agency}")));
        }
        Ok(environment.agency_path(agency))
    }

    /// Paths for today's (UTC) snapshot.
    pub fn snapshot_paths(&self, env: &str, agency: &str) -> Result<SnapshotPaths> {
        self.snapshot_paths_on(env, agency, Utc::now().date_naive())
    }

    pub fn snapshot_paths_on(&self, env: &str, agency: &str, date: NaiveDate) -> Result<SnapshotPaths> {
        let storage_key = format!(
            "{}/{}",
            self.agency_path(env, agency)?,
            date.format("%Y-%m-%d")
        );
        let local_dir = self.snapshot_root.join(&storage_key);
        Ok(SnapshotPaths {
            storage_key,
            local_dir,
        })
    }
}
