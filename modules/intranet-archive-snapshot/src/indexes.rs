//! Browsing indexes regenerated after every publish: one per agency listing
//! its snapshot dates, one per environment listing its agencies.

use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use intranet_archive_common::{Environment, Result};

use crate::paths::PathResolver;
use crate::storage::{ObjectStore, PutOptions};

static SNAPSHOT_FOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

const INDEX_CSS: &str = "body{font-family:system-ui,-apple-system,sans-serif;margin:0;color:#212529}\
.container{max-width:720px;margin:0 auto}.px-4{padding-left:1.5rem;padding-right:1.5rem}\
.py-5{padding-top:3rem;padding-bottom:3rem}.pb-2{padding-bottom:.5rem}\
.border-bottom{border-bottom:1px solid #dee2e6}.list-group{list-style:none;padding:0}\
.list-group-item{padding:.5rem 1rem;border:1px solid #dee2e6;margin-top:-1px}";

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Agencies that have a folder in the bucket for `environment`. Production
/// folders are bare agency names; other environments use `{env}-{agency}`.
/// Only allow-listed agencies are returned.
pub async fn list_agencies(
    store: &dyn ObjectStore,
    environment: &Environment,
    allowed: &[String],
) -> Result<Vec<String>> {
    let folders = store.list_folders("").await?;
    let env_prefix = format!("{}-", environment.name);
    Ok(folders
        .into_iter()
        .filter_map(|folder| {
            if environment.is_production() {
                Some(folder)
            } else {
                folder.strip_prefix(&env_prefix).map(String::from)
            }
        })
        .filter(|agency| allowed.contains(agency))
        .collect())
}

/// Snapshot dates under `{agency_path}/`, newest first.
pub async fn list_snapshots(store: &dyn ObjectStore, agency_path: &str) -> Result<Vec<String>> {
    let mut dates: Vec<String> = store
        .list_folders(&format!("{agency_path}/"))
        .await?
        .into_iter()
        .filter(|folder| SNAPSHOT_FOLDER.is_match(folder))
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    Ok(dates)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_page(heading: &str, items: &[(String, String)]) -> String {
    let list: String = items
        .iter()
        .map(|(href, label)| {
            format!(
                "\n        <li class=\"list-group-item\"><a href=\"{}\" target=\"_blank\">{}</a></li>",
                escape(href),
                escape(label)
            )
        })
        .collect();
    format!(
        r#"<!doctype html><html lang="en">
  <head><title>Intranet Archive Index</title><style>{INDEX_CSS}</style></head>
  <body>
    <main>
      <div class="container px-4 py-5">
        <h1>Intranet Archive</h1>
        <h2 class="pb-2 border-bottom">{}</h2>
        <ul class="list-group">{list}
        </ul>
      </div>
    </main>
  </body>
</html>
"#,
        escape(heading)
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Each date links into the mirrored host folder of that snapshot.
pub fn render_agency_index(host: &str, agency: &str, agency_path: &str, dates: &[String]) -> String {
    let items: Vec<(String, String)> = dates
        .iter()
        .map(|date| (format!("/{agency_path}/{date}/{host}/index.html"), date.clone()))
        .collect();
    render_page(&format!("{host} - {agency}"), &items)
}

/// `agencies` pairs an agency name with its folder in the bucket.
pub fn render_root_index(host: &str, agencies: &[(String, String)]) -> String {
    let items: Vec<(String, String)> = agencies
        .iter()
        .map(|(agency, path)| (format!("/{path}/index.html"), agency.clone()))
        .collect();
    render_page(host, &items)
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

fn index_options(max_age_secs: u64) -> PutOptions {
    PutOptions::content_type("text/html").with_cache_control(format!("max-age={max_age_secs}"))
}

/// Write `{agencyPath}/index.html`. Returns the dates listed.
pub async fn publish_agency_index(
    store: &dyn ObjectStore,
    resolver: &PathResolver,
    env: &str,
    agency: &str,
    max_age_secs: u64,
) -> Result<Vec<String>> {
    let environment = resolver.environment(env)?;
    let agency_path = resolver.agency_path(env, agency)?;
    let dates = list_snapshots(store, &agency_path).await?;
    let html = render_agency_index(environment.host(), agency, &agency_path, &dates);
    store
        .put_object(
            &format!("{agency_path}/index.html"),
            html.into_bytes(),
            index_options(max_age_secs),
        )
        .await?;
    info!(env, agency, snapshots = dates.len(), "Agency index written");
    Ok(dates)
}

/// Write the environment's root index (`index.html` or `{env}.html`).
/// Returns the agencies listed.
pub async fn publish_root_index(
    store: &dyn ObjectStore,
    resolver: &PathResolver,
    env: &str,
    max_age_secs: u64,
) -> Result<Vec<String>> {
    let environment = resolver.environment(env)?;
    let agencies = list_agencies(store, environment, resolver.agencies()).await?;
    let entries = agencies
        .iter()
        .map(|agency| Ok((agency.clone(), resolver.agency_path(env, agency)?)))
        .collect::<Result<Vec<_>>>()?;
    let html = render_root_index(environment.host(), &entries);
    store
        .put_object(&environment.index_page(), html.into_bytes(), index_options(max_age_secs))
        .await?;
    info!(env, agencies = agencies.len(), "Root index written");
    Ok(agencies)
}
