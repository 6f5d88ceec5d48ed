mod cache;
mod jobs;
mod rest;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use intranet_archive_access::{AccessGateway, RateLimitConfig, RateLimiter};
use intranet_archive_common::{telemetry::init_logging, AppConfig};
use intranet_archive_snapshot::{
    parse_schedule, CaptureSettings, HttrackLauncher, MetricsCollector, ObjectStore, PathResolver,
    PipelineSettings, S3Store, SnapshotPipeline,
};

use crate::cache::TimedCache;
use crate::rest::AppState;

const HEALTH_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    let redactor = Arc::new(config.redactor());
    init_logging(redactor.clone())?;
    config.log_keys();

    let resolver = PathResolver::new(
        config.environments.clone(),
        config.allowed_agencies.clone(),
        config.snapshot_dir.clone(),
    );
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::connect(&config.storage).await);
    let launcher = Arc::new(HttrackLauncher::new(config.httrack_bin.clone(), redactor));

    let settings = PipelineSettings {
        capture: CaptureSettings {
            plugin: config.httrack_plugin.clone(),
            ..CaptureSettings::default()
        },
        capture_timeout: Duration::from_secs(config.capture_timeout_secs),
        ..PipelineSettings::default()
    };
    let pipeline = Arc::new(SnapshotPipeline::new(
        resolver.clone(),
        launcher,
        store.clone(),
        settings,
    ));

    let schedule = parse_schedule(&config.snapshot_schedule, &resolver)?;
    jobs::spawn_schedule(pipeline.clone(), schedule);
    jobs::spawn_cleanup(config.snapshot_dir.clone());

    let state = Arc::new(AppState {
        pipeline,
        gateway: AccessGateway::from_config(&config)?,
        rate_limiter: RateLimiter::new(RateLimitConfig::default()),
        metrics: MetricsCollector::new(store, resolver, config.cdn.public_url.clone())?,
        metrics_cache: TimedCache::new(HEALTH_CACHE_TTL),
        status_cache: TimedCache::new(HEALTH_CACHE_TTL),
    });
    let app = rest::router(state, &config.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Intranet archive listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
