//! Durable object storage seam. `S3Store` in production, `MemoryStore` in tests.

mod memory;
mod s3;

pub use memory::{MemoryStore, StoredObject};
pub use s3::S3Store;

use async_trait::async_trait;

use intranet_archive_common::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

impl PutOptions {
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            cache_control: None,
        }
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object whose key starts with `prefix`.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;

    /// Names of the immediate "folders" below `prefix` (keys are split on `/`).
    /// Names carry neither the prefix nor a trailing slash.
    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>>;

    async fn put_object(&self, key: &str, body: Vec<u8>, options: PutOptions) -> Result<()>;

    /// `None` when the key does not exist.
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Cheap reachability probe for health reporting.
    async fn check_access(&self) -> Result<()>;
}

/// Folder name directly under `prefix` for `key`, if the key is nested deeper.
pub(crate) fn folder_of<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = key.strip_prefix(prefix)?;
    let (folder, _) = rest.split_once('/')?;
    (!folder.is_empty()).then_some(folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_of_takes_the_first_segment() {
        assert_eq!(folder_of("", "dev-hq/2024-01-17/index.html"), Some("dev-hq"));
        assert_eq!(folder_of("dev-hq/", "dev-hq/2024-01-17/index.html"), Some("2024-01-17"));
        assert_eq!(folder_of("dev-hq/", "dev-hq/index.html"), None);
        assert_eq!(folder_of("dev-hq/", "hq/2024-01-17/index.html"), None);
    }
}
