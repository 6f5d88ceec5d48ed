//! Mirror a local directory tree to a storage prefix.
//!
//! Keys that already exist with the same size are skipped, so a sync that
//! failed half way resumes instead of starting over when retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};
use walkdir::WalkDir;

use intranet_archive_common::{ArchiveError, Result};

use crate::storage::{ObjectStore, PutOptions};

const UPLOAD_CONCURRENCY: usize = 8;
/// Mirrored pages are frequently saved without an extension.
const FALLBACK_CONTENT_TYPE: &str = "text/html";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub skipped: usize,
}

#[derive(Debug)]
struct LocalFile {
    /// `/`-separated path relative to the synced root.
    relative: String,
    path: PathBuf,
    size: u64,
}

/// Upload every file under `local` to `{prefix}/{relative path}`. Files whose
/// relative path is listed in `exclude` are never uploaded.
pub async fn sync_directory(
    store: &dyn ObjectStore,
    local: &Path,
    prefix: &str,
    exclude: &[&str],
) -> Result<SyncReport> {
    let files = list_local_files(local.to_path_buf()).await?;
    let prefix = prefix.trim_end_matches('/');

    let existing: HashMap<String, u64> = store
        .list_objects(&format!("{prefix}/"))
        .await?
        .into_iter()
        .map(|o| (o.key, o.size))
        .collect();

    let mut report = SyncReport::default();
    let mut pending = Vec::new();
    for file in files {
        if exclude.contains(&file.relative.as_str()) {
            debug!(file = %file.relative, "Excluded from sync");
            continue;
        }
        let key = format!("{prefix}/{}", file.relative);
        if existing.get(&key) == Some(&file.size) {
            report.skipped += 1;
            continue;
        }
        pending.push((key, file));
    }

    report.uploaded = pending.len();
    stream::iter(pending)
        .map(|(key, file)| upload(store, key, file))
        .buffer_unordered(UPLOAD_CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;

    info!(prefix, uploaded = report.uploaded, skipped = report.skipped, "Sync complete");
    Ok(report)
}

async fn upload(store: &dyn ObjectStore, key: String, file: LocalFile) -> Result<()> {
    let body = tokio::fs::read(&file.path).await?;
    store
        .put_object(&key, body, PutOptions::content_type(content_type_for(&file.path)))
        .await
}

pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

async fn list_local_files(root: PathBuf) -> Result<Vec<LocalFile>> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .map_err(|e| ArchiveError::Validation(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry.metadata().map_err(|e| ArchiveError::Io(e.into()))?.len();
            files.push(LocalFile {
                relative,
                path: entry.path().to_path_buf(),
                size,
            });
        }
        Ok(files)
    })
    .await
    .map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn content_type_falls_back_to_html() {
        assert_eq!(content_type_for(Path::new("a/site.css")), "text/css");
        assert_eq!(content_type_for(Path::new("a/logo.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a/about-us")), "text/html");
    }

    #[tokio::test]
    async fn uploads_tree_under_prefix_with_content_types() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<html></html>");
        write(dir.path(), "intranet.example/css/site.css", "body{}");
        write(dir.path(), "cookies.txt", "jwt=secret");

        let store = MemoryStore::new();
        let report = sync_directory(&store, dir.path(), "dev-hq/2024-01-17", &["cookies.txt"])
            .await
            .unwrap();

        assert_eq!(report, SyncReport { uploaded: 2, skipped: 0 });
        assert_eq!(
            store.keys(),
            vec![
                "dev-hq/2024-01-17/index.html",
                "dev-hq/2024-01-17/intranet.example/css/site.css"
            ]
        );
        let css = store.get("dev-hq/2024-01-17/intranet.example/css/site.css").unwrap();
        assert_eq!(css.options.content_type.as_deref(), Some("text/css"));
    }

    #[tokio::test]
    async fn resumes_by_skipping_same_size_objects() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.html", "aaaa");
        write(dir.path(), "b.html", "bbbb");
        write(dir.path(), "c.html", "cccc");

        let store = MemoryStore::new();
        store.insert("hq/2024-01-17/a.html", "aaaa");
        store.insert("hq/2024-01-17/b.html", "stale content");

        let report = sync_directory(&store, dir.path(), "hq/2024-01-17/", &[]).await.unwrap();
        assert_eq!(report, SyncReport { uploaded: 2, skipped: 1 });
        assert_eq!(store.get("hq/2024-01-17/b.html").unwrap().body, b"bbbb");
    }

    #[tokio::test]
    async fn storage_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "x");
        let store = MemoryStore::new();
        store.fail_puts(1);
        let err = sync_directory(&store, dir.path(), "hq/2024-01-17", &[]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
