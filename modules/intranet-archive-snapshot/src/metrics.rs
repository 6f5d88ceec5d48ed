//! Health metrics: bucket and intranet reachability plus per-agency snapshot
//! counts and freshness, rendered in a line-oriented exposition format.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::header::COOKIE;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use intranet_archive_common::{ArchiveError, Environment, Result};

use crate::indexes::{list_agencies, list_snapshots};
use crate::paths::PathResolver;
use crate::storage::ObjectStore;

struct Descriptor {
    name: &'static str,
    help: &'static str,
    kind: &'static str,
    unit: Option<&'static str>,
}

const DESCRIPTORS: &[Descriptor] = &[
    Descriptor {
        name: "bucket_access",
        help: "Whether the storage bucket can be listed (1 = yes).",
        kind: "gauge",
        unit: None,
    },
    Descriptor {
        name: "cdn_forbidden",
        help: "Whether the CDN refuses a request without signed cookies (1 = yes).",
        kind: "gauge",
        unit: None,
    },
    Descriptor {
        name: "intranet_access",
        help: "Whether the intranet answers the archiver with 200 (1 = yes).",
        kind: "gauge",
        unit: None,
    },
    Descriptor {
        name: "snapshot_count",
        help: "Number of published snapshots.",
        kind: "gauge",
        unit: None,
    },
    Descriptor {
        name: "most_recent_snapshot_age",
        help: "Age of the most recent snapshot.",
        kind: "gauge",
        unit: Some("days"),
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub env: Option<String>,
    pub agency: Option<String>,
    pub value: i64,
}

impl Facet {
    pub fn env(env: &str, value: i64) -> Self {
        Self {
            env: Some(env.to_string()),
            agency: None,
            value,
        }
    }

    pub fn agency(env: &str, agency: &str, value: i64) -> Self {
        Self {
            env: Some(env.to_string()),
            agency: Some(agency.to_string()),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricValue {
    Value(i64),
    Facets(Vec<Facet>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn value(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: MetricValue::Value(value),
        }
    }

    pub fn facets(name: &str, facets: Vec<Facet>) -> Self {
        Self {
            name: name.to_string(),
            value: MetricValue::Facets(facets),
        }
    }
}

/// One block per metric: `# HELP`, `# TYPE`, optional `# UNIT`, value
/// line(s), blank line. The output ends with an `EOF` line.
pub fn metrics_string(metrics: &[Metric]) -> Result<String> {
    let mut lines: Vec<String> = Vec::new();
    for metric in metrics {
        let key = metric.name.as_str();
        let descriptor = DESCRIPTORS
            .iter()
            .find(|d| d.name == key)
            .ok_or_else(|| ArchiveError::Validation(format!("Unknown metric {key}")))?;

        lines.push(format!("# HELP {key} {}", descriptor.help));
        lines.push(format!("# TYPE {key} {}", descriptor.kind));
        if let Some(unit) = descriptor.unit {
            lines.push(format!("# UNIT {key} {unit}"));
        }

        match &metric.value {
            MetricValue::Value(value) => lines.push(format!("{key} {value}")),
            MetricValue::Facets(facets) if facets.is_empty() => {
                return Err(ArchiveError::Validation(format!(
                    "Metric {key} has no value or facets"
                )));
            }
            MetricValue::Facets(facets) => {
                for facet in facets {
                    let labels: Vec<String> = [("env", &facet.env), ("agency", &facet.agency)]
                        .into_iter()
                        .filter_map(|(label, v)| v.as_ref().map(|v| format!("{label}=\"{v}\"")))
                        .collect();
                    lines.push(format!("{key}{{{}}} {}", labels.join(","), facet.value));
                }
            }
        }
        lines.push(String::new());
    }
    lines.push("EOF".to_string());
    lines.push(String::new());
    Ok(lines.join("\n"))
}

/// Append facets to the metric of the same name, or add the metric.
fn merge(metrics: &mut Vec<Metric>, metric: Metric) {
    if let MetricValue::Facets(facets) = &metric.value {
        if let Some(Metric {
            value: MetricValue::Facets(into),
            ..
        }) = metrics.iter_mut().find(|m| m.name == metric.name)
        {
            into.extend(facets.iter().cloned());
            return;
        }
    }
    metrics.push(metric);
}

/// `snapshot_count` and `most_recent_snapshot_age` (whole days before
/// `today`) for one agency. Both are zero when nothing has been published.
pub async fn agency_snapshot_metrics(
    store: &dyn ObjectStore,
    agency_path: &str,
    env: &str,
    agency: &str,
    today: NaiveDate,
) -> Result<Vec<Metric>> {
    let snapshots = list_snapshots(store, agency_path).await?;
    let age = match snapshots.first() {
        Some(newest) => {
            let date = NaiveDate::parse_from_str(newest, "%Y-%m-%d")
                .map_err(|e| ArchiveError::Validation(format!("Invalid date format {newest}: {e}")))?;
            (today - date).num_days()
        }
        None => 0,
    };
    Ok(vec![
        Metric::facets("snapshot_count", vec![Facet::agency(env, agency, snapshots.len() as i64)]),
        Metric::facets("most_recent_snapshot_age", vec![Facet::agency(env, agency, age)]),
    ])
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub env: String,
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub bucket: bool,
    pub intranet: Vec<EnvironmentStatus>,
}

pub struct MetricsCollector {
    store: Arc<dyn ObjectStore>,
    resolver: PathResolver,
    http: reqwest::Client,
    cdn_url: Option<Url>,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn ObjectStore>, resolver: PathResolver, cdn_url: Option<Url>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .user_agent("intranet-archive")
            .build()
            .map_err(|e| ArchiveError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            store,
            resolver,
            http,
            cdn_url,
        })
    }

    /// Environments with a crawl credential, plus `local` when configured.
    fn monitored(&self) -> Vec<&Environment> {
        self.resolver
            .environments()
            .iter()
            .filter(|e| e.credential.is_some() || e.name == "local")
            .collect()
    }

    pub async fn collect(&self, today: NaiveDate) -> Result<Vec<Metric>> {
        let mut metrics = vec![Metric::value("bucket_access", self.bucket_access().await as i64)];

        if let Some(cdn_url) = &self.cdn_url {
            metrics.push(Metric::value("cdn_forbidden", self.cdn_forbidden(cdn_url).await as i64));
        }

        let environments = self.monitored();
        let mut intranet = Vec::new();
        for environment in &environments {
            intranet.push(Facet::env(&environment.name, self.intranet_access(environment).await as i64));
        }
        if !intranet.is_empty() {
            metrics.push(Metric::facets("intranet_access", intranet));
        }

        for environment in &environments {
            let env = environment.name.as_str();
            let agencies =
                list_agencies(self.store.as_ref(), environment, self.resolver.agencies()).await?;
            for agency in agencies {
                let agency_path = self.resolver.agency_path(env, &agency)?;
                for metric in
                    agency_snapshot_metrics(self.store.as_ref(), &agency_path, env, &agency, today).await?
                {
                    merge(&mut metrics, metric);
                }
            }
        }

        info!(metrics = metrics.len(), "Metrics collected");
        Ok(metrics)
    }

    pub async fn status(&self) -> StatusReport {
        let bucket = self.bucket_access().await;
        let mut intranet = Vec::new();
        for environment in self.monitored() {
            intranet.push(EnvironmentStatus {
                env: environment.name.clone(),
                reachable: self.intranet_access(environment).await,
            });
        }
        StatusReport { bucket, intranet }
    }

    async fn bucket_access(&self) -> bool {
        match self.store.check_access().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Bucket is not accessible");
                false
            }
        }
    }

    /// The CDN must refuse an unauthenticated request.
    async fn cdn_forbidden(&self, cdn_url: &Url) -> bool {
        match self.http.get(cdn_url.clone()).send().await {
            Ok(response) => response.status() == reqwest::StatusCode::FORBIDDEN,
            Err(e) => {
                warn!(url = %cdn_url, error = %e, "CDN probe failed");
                false
            }
        }
    }

    async fn intranet_access(&self, environment: &Environment) -> bool {
        let agency = self
            .resolver
            .agencies()
            .first()
            .map(String::as_str)
            .unwrap_or("hq");
        let cookie = match &environment.credential {
            Some(jwt) => format!("dw_agency={agency}; jwt={jwt}"),
            None => format!("dw_agency={agency}"),
        };
        match self
            .http
            .get(environment.base_url.clone())
            .header(COOKIE, cookie)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                warn!(env = %environment.name, error = %e, "Intranet probe failed");
                false
            }
        }
    }
}
