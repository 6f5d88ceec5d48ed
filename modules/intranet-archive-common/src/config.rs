use std::env;
use std::path::PathBuf;

use url::Url;

use crate::environment::{Environment, EnvironmentSet};
use crate::error::{ArchiveError, Result};
use crate::redact::Redactor;

/// Known intranet environments and their default base URLs.
const KNOWN_ENVIRONMENTS: &[(&str, &str)] = &[
    ("production", "https://intranet.justice.gov.uk/"),
    ("staging", "https://staging.intranet.justice.gov.uk/"),
    ("demo", "https://demo.intranet.justice.gov.uk/"),
    ("dev", "https://dev.intranet.justice.gov.uk/"),
    ("local", "http://intranet.docker/"),
];

#[derive(Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (minio locally). Forces path-style addressing.
    pub endpoint: Option<String>,
}

#[derive(Clone)]
pub struct CdnConfig {
    pub public_key: String,
    pub private_key: String,
    /// JSON array of `{id, comment}` published key metadata.
    pub keys_object: String,
    /// Leading label of the app host, stripped to get the CDN host.
    pub subdomain: String,
    pub cookie_ttl_secs: i64,
    /// Public CDN origin probed by the `cdn_forbidden` metric.
    pub public_url: Option<Url>,
}

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub environments: EnvironmentSet,
    pub allowed_agencies: Vec<String>,
    pub shared_secret: String,
    pub storage: StorageConfig,
    pub cdn: CdnConfig,
    pub snapshot_schedule: String,
    pub snapshot_dir: PathBuf,
    pub httrack_bin: String,
    pub httrack_plugin: Option<String>,
    pub capture_timeout_secs: u64,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let include_local = env_flag("IS_LOCAL") || env_flag("CI");
        let mut environments = Vec::new();
        for (name, default_url) in KNOWN_ENVIRONMENTS {
            if *name == "local" && !include_local {
                continue;
            }
            let upper = name.to_uppercase();
            let raw = env::var(format!("INTRANET_URL_{upper}"))
                .unwrap_or_else(|_| default_url.to_string());
            let base_url = Url::parse(&raw)
                .map_err(|e| ArchiveError::Config(format!("INTRANET_URL_{upper}: {e}")))?;
            let credential = env::var(format!("INTRANET_JWT_{upper}")).ok();
            environments.push(Environment::new(*name, base_url, credential));
        }

        Ok(Self {
            port: parse_or("PORT", 2000)?,
            environments: EnvironmentSet::new(environments),
            allowed_agencies: comma_list(&env::var("ALLOWED_AGENCIES").unwrap_or_default()),
            shared_secret: required_env("INTRANET_ARCHIVE_SHARED_SECRET")?,
            storage: StorageConfig {
                bucket: required_env("S3_BUCKET_NAME")?,
                region: env::var("S3_REGION").unwrap_or_else(|_| "eu-west-2".to_string()),
                endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            },
            cdn: CdnConfig {
                public_key: required_env("AWS_CLOUDFRONT_PUBLIC_KEY")?,
                private_key: required_env("AWS_CLOUDFRONT_PRIVATE_KEY")?,
                keys_object: required_env("AWS_CLOUDFRONT_PUBLIC_KEYS_OBJECT")?,
                subdomain: env::var("CDN_SUBDOMAIN").unwrap_or_else(|_| "app".to_string()),
                cookie_ttl_secs: parse_or("CDN_COOKIE_TTL_SECS", 3600)?,
                public_url: env::var("CDN_URL")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(|raw| Url::parse(&raw))
                    .transpose()
                    .map_err(|e| ArchiveError::Config(format!("CDN_URL: {e}")))?,
            },
            snapshot_schedule: env::var("SNAPSHOT_SCHEDULE").unwrap_or_default(),
            snapshot_dir: PathBuf::from(
                env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "/tmp/snapshots".to_string()),
            ),
            httrack_bin: env::var("HTTRACK_BIN").unwrap_or_else(|_| "httrack".to_string()),
            httrack_plugin: env::var("HTTRACK_PLUGIN").ok().filter(|s| !s.is_empty()),
            capture_timeout_secs: parse_or("CAPTURE_TIMEOUT_SECS", 6 * 60 * 60)?,
            allowed_origins: comma_list(&env::var("CORS_ORIGINS").unwrap_or_default()),
        })
    }

    /// Every secret that must never appear in a log line.
    pub fn redactor(&self) -> Redactor {
        let mut redactor = Redactor::new(self.environments.credentials());
        redactor.extend([self.shared_secret.clone(), self.cdn.private_key.clone()]);
        redactor
    }

    /// Log the loaded configuration with secrets previewed. Call after the
    /// subscriber is installed.
    pub fn log_keys(&self) {
        fn preview(val: &str) -> String {
            let head: String = val.chars().take(5).collect();
            format!("{head}...({} chars)", val.chars().count())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  S3_BUCKET_NAME: {}", self.storage.bucket);
        tracing::info!("  ALLOWED_AGENCIES: {}", self.allowed_agencies.join(","));
        tracing::info!("  SNAPSHOT_SCHEDULE: {}", self.snapshot_schedule);
        tracing::info!(
            "  INTRANET_ARCHIVE_SHARED_SECRET: {}",
            preview(&self.shared_secret)
        );
        for environment in self.environments.iter() {
            tracing::info!(
                "  {}: {} (credential {})",
                environment.name,
                environment.base_url,
                if environment.credential.is_some() { "set" } else { "<not set>" }
            );
        }
    }
}

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| ArchiveError::Config(format!("{key} environment variable is required")))
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|v| v == "true").unwrap_or(false)
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ArchiveError::Config(format!("{key} must be a number"))),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
