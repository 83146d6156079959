// src/sys/remote.rs
//
// Synchronises a local directory tree into a prefix of an object store.

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{DeployError, StorageError, TransferError};
use crate::sys::cancel::CancelToken;
use crate::sys::traits::{ObjectMeta, ObjectStore};

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 10;

/// Edge cache lifetimes in seconds, by asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub html: u64,
    pub js: u64,
    pub css: u64,
    pub image: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            html: 60,
            js: 604_800,
            css: 604_800,
            image: 604_800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub max_concurrency: usize,
    pub cache: CachePolicy,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            cache: CachePolicy::default(),
        }
    }
}

impl UploadOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_cache_policy(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }
}

/// Emitted once per successfully uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgressEvent {
    pub path: PathBuf,
    pub relative_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
}

struct LocalFile {
    path: PathBuf,
    relative_path: String,
}

enum Outcome {
    Uploaded,
    Failed(TransferError),
    NotAttempted,
}

pub struct RemoteStorageSync {
    store: Arc<dyn ObjectStore>,
    options: UploadOptions,
}

impl RemoteStorageSync {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            options: UploadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn folder_exists(&self, prefix: &str) -> Result<bool, StorageError> {
        self.store.exists(&folder_prefix(prefix)).await
    }

    /// Removes everything under `prefix` and nothing outside it.
    pub async fn empty_folder(&self, prefix: &str) -> Result<usize, StorageError> {
        let folder = folder_prefix(prefix);
        let removed = self.store.delete_prefix(&folder).await?;
        info!("Removed {} object(s) under '{}'", removed, folder);
        Ok(removed)
    }

    /// Uploads every file below `local_dir` to `prefix`, keeping relative paths.
    ///
    /// Files are issued in lexicographic order, up to `max_concurrency` at a time.
    /// A failed file does not stop the others; failures are collected and
    /// reported together. A fatal connectivity error or cancellation stops
    /// new uploads while in-flight ones finish.
    pub async fn upload_dir(
        &self,
        local_dir: &Path,
        prefix: &str,
        cancel: &CancelToken,
        on_progress: &(dyn Fn(&SyncProgressEvent) + Send + Sync),
    ) -> Result<UploadSummary, DeployError> {
        let root = local_dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|e| DeployError::FileAccess {
                path: local_dir.to_path_buf(),
                source: std::io::Error::other(e),
            })??;
        let folder = folder_prefix(prefix);
        let abort_flag = AtomicBool::new(false);
        let abort = &abort_flag;

        info!("Uploading {} file(s) from {} to '{}'", files.len(), local_dir.display(), folder);

        let outcomes: Vec<Outcome> = stream::iter(files)
            .map(|file| {
                let folder = folder.as_str();
                async move {
                    if cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                        return Outcome::NotAttempted;
                    }
                    let key = url_join(&[folder, &file.relative_path]);
                    match self.upload_file(&file, &key).await {
                        Ok(()) => {
                            debug!("Uploaded {}", key);
                            on_progress(&SyncProgressEvent {
                                path: file.path,
                                relative_path: file.relative_path,
                            });
                            Outcome::Uploaded
                        }
                        Err(error) => {
                            warn!("Upload of {} failed: {}", file.path.display(), error);
                            if error.is_fatal() {
                                abort.store(true, Ordering::SeqCst);
                            }
                            Outcome::Failed(TransferError {
                                path: file.path,
                                key,
                                error,
                            })
                        }
                    }
                }
            })
            .buffer_unordered(self.options.max_concurrency.max(1))
            .collect()
            .await;

        let mut uploaded = 0;
        let mut not_attempted = 0;
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Uploaded => uploaded += 1,
                Outcome::NotAttempted => not_attempted += 1,
                Outcome::Failed(e) => failed.push(e),
            }
        }

        if cancel.is_cancelled() && not_attempted > 0 {
            warn!(
                "Upload cancelled after {} file(s), {} failed, {} not attempted",
                uploaded,
                failed.len(),
                not_attempted
            );
            return Err(DeployError::Cancelled);
        }
        if !failed.is_empty() {
            failed.sort_by(|a, b| a.path.cmp(&b.path));
            return Err(DeployError::Upload {
                failed,
                not_attempted,
            });
        }
        Ok(UploadSummary { uploaded })
    }

    async fn upload_file(&self, file: &LocalFile, key: &str) -> Result<(), StorageError> {
        let content = tokio::fs::read(&file.path).await.map_err(|e| StorageError::Put {
            key: key.to_string(),
            message: format!("cannot read {}: {}", file.path.display(), e),
        })?;
        let meta = ObjectMeta {
            content_type: content_type_for(&file.path).map(str::to_owned),
            cache_control: cache_control_for(&file.path, &self.options.cache),
        };
        self.store.put(key, content, &meta).await
    }
}

/// Regular files below `dir` (the root itself excluded), sorted by path.
fn collect_files(dir: &Path) -> Result<Vec<LocalFile>, DeployError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            DeployError::FileAccess {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let relative_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(LocalFile {
            path: entry.into_path(),
            relative_path,
        });
    }
    Ok(files)
}

/// `a/b` and `/a/b/` both become `a/b/`; the empty prefix stays empty.
pub fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Joins key parts with single slashes, skipping empty parts.
pub fn url_join(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ct = match extension(path)?.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(ct)
}

pub fn cache_control_for(path: &Path, policy: &CachePolicy) -> Option<String> {
    let seconds = match extension(path)?.as_str() {
        "html" | "htm" => policy.html,
        "js" | "mjs" => policy.js,
        "css" => policy.css,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" => policy.image,
        _ => return None,
    };
    Some(format!("s-maxage={}", seconds))
}
