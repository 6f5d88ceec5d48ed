pub mod config;
pub mod environment;
pub mod error;
pub mod redact;
pub mod telemetry;

pub use config::{AppConfig, CdnConfig, StorageConfig};
pub use environment::{Environment, EnvironmentSet, PRODUCTION};
pub use error::{ArchiveError, AuthError, Result};
pub use redact::Redactor;
