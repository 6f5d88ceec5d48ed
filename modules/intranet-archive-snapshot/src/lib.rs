//! Capture and publish pipeline: drives the mirroring tool, watches its
//! artifacts, and publishes finished snapshots to object storage.

pub mod httrack;
pub mod indexes;
pub mod lifecycle;
pub mod metrics;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod schedule;
pub mod storage;
pub mod sync;

pub use httrack::{
    build_arguments, CaptureLauncher, CapturePlan, CaptureSettings, CaptureTarget,
    HttrackLauncher, RunningCapture, SENSITIVE_FILES,
};
pub use indexes::{publish_agency_index, publish_root_index};
pub use lifecycle::{delete_old_snapshots, DEFAULT_MAX_AGE_DAYS};
pub use metrics::{metrics_string, Metric, MetricsCollector, StatusReport};
pub use paths::{PathResolver, SnapshotPaths};
pub use pipeline::{JobStatus, PipelineSettings, PublishReport, SnapshotJob, SnapshotPipeline};
pub use progress::{ProgressSnapshot, ProgressTracker, WaitConfig, WaitOutcome};
pub use retry::{retry, RetryOptions, RetryState};
pub use schedule::{parse_schedule, ScheduleEntry, Scheduler};
pub use storage::{MemoryStore, ObjectStore, ObjectSummary, PutOptions, S3Store, StoredObject};
pub use sync::{sync_directory, SyncReport};
