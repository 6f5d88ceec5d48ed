use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use intranet_archive_common::{ArchiveError, Result};

use super::{folder_of, ObjectStore, ObjectSummary, PutOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub options: PutOptions,
}

/// In-process bucket. Keys are kept sorted, like an S3 listing.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing_puts: AtomicUsize,
    puts: AtomicUsize,
    unreachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` puts fail with a storage error.
    pub fn fail_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Successful puts so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.lock().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                options: PutOptions::default(),
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ArchiveError::Storage("bucket unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        self.check_reachable()?;
        Ok(self
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectSummary {
                key: key.clone(),
                size: object.body.len() as u64,
            })
            .collect())
    }

    async fn list_folders(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_reachable()?;
        let folders: BTreeSet<String> = self
            .lock()
            .keys()
            .filter_map(|key| folder_of(prefix, key).map(String::from))
            .collect();
        Ok(folders.into_iter().collect())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: PutOptions) -> Result<()> {
        self.check_reachable()?;
        let remaining = self.failing_puts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_puts.store(remaining - 1, Ordering::SeqCst);
            return Err(ArchiveError::Storage(format!("injected failure writing {key}")));
        }
        self.lock()
            .insert(key.to_string(), StoredObject { body, options });
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_reachable()?;
        Ok(self.lock().get(key).map(|o| o.body.clone()))
    }

    async fn check_access(&self) -> Result<()> {
        self.check_reachable()
    }
}
