// src/sys/storage.rs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::error::{DeployError, StorageError};
use crate::sys::blocking::run_blocking;
use crate::sys::secrets::StorageCredentials;
use crate::sys::traits::{ObjectMeta, ObjectStore, StoreConnector};

// ==============================================================================
// 1. In-Memory Store
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub meta: ObjectMeta,
}

/// Ordered key/value store. Backs dry runs and tests.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    #[cfg(test)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn exists(&self, prefix: &str) -> Result<bool, StorageError> {
        let objects = self.objects.read().await;
        Ok(objects
            .range(prefix.to_string()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(prefix)))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let mut objects = self.objects.write().await;
        let before = objects.len();
        objects.retain(|k, _| !k.starts_with(prefix));
        Ok(before - objects.len())
    }

    async fn put(&self, key: &str, content: Vec<u8>, meta: &ObjectMeta) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey { key: key.to_string() });
        }
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                content,
                meta: meta.clone(),
            },
        );
        Ok(())
    }
}

/// Hands out the same in-memory store for every credential set.
pub struct InMemoryConnector {
    store: Arc<InMemoryObjectStore>,
}

impl InMemoryConnector {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self, _creds: &StorageCredentials) -> Result<Arc<dyn ObjectStore>, DeployError> {
        Ok(self.store.clone())
    }
}

// ==============================================================================
// 2. Directory-Backed Store
// ==============================================================================

/// A local directory acting as the bucket, for development and previews.
/// Object keys map to relative paths, so prefixes are expected in folder
/// form (`site/`). `ObjectMeta` is not persisted; production deployments go
/// through `S3ObjectStore`.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// 🛡️ Keys may not climb out of the bucket root.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key.trim_end_matches('/'));
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StorageError::InvalidKey { key: key.to_string() });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, prefix: &str) -> Result<bool, StorageError> {
        let dir = self.resolve(prefix)?;
        run_blocking(move || has_object(&dir))
            .await
            .map_err(|e| StorageError::List {
                prefix: prefix.to_string(),
                message: e.to_string(),
            })
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let dir = self.resolve(prefix)?;
        let whole_bucket = dir == self.root;
        run_blocking(move || {
            if whole_bucket {
                clear_dir(&dir)
            } else {
                remove_tree(&dir)
            }
        })
        .await
        .map_err(|e| StorageError::Delete {
            key: prefix.to_string(),
            message: e.to_string(),
        })
    }

    async fn put(&self, key: &str, content: Vec<u8>, _meta: &ObjectMeta) -> Result<(), StorageError> {
        let target = self.resolve(key)?;
        let parent = match target.parent() {
            Some(parent) if target != self.root => parent.to_path_buf(),
            _ => return Err(StorageError::InvalidKey { key: key.to_string() }),
        };

        // Each put stages into its own uniquely named file, so concurrent puts
        // of neighbouring keys never share a staging path.
        run_blocking(move || {
            std::fs::create_dir_all(&parent)?;
            let mut staged = tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(&parent)?;
            staged.write_all(&content)?;
            staged.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Put {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

const STAGING_PREFIX: &str = ".webdeploy-staging-";

fn is_staging(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with(STAGING_PREFIX))
}

fn has_object(dir: &Path) -> std::io::Result<bool> {
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().is_some_and(|io| io.kind() == ErrorKind::NotFound) => {
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if entry.file_type().is_file() && !is_staging(&entry) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Empties `dir` but keeps the directory itself.
fn clear_dir(dir: &Path) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        removed += remove_tree(&entry?.path())?;
    }
    Ok(removed)
}

/// Removes a file or directory tree and returns how many objects it held.
fn remove_tree(path: &Path) -> std::io::Result<usize> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    if !meta.is_dir() {
        std::fs::remove_file(path)?;
        return Ok(1);
    }
    let count = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && !is_staging(e))
        .count();
    std::fs::remove_dir_all(path)?;
    Ok(count)
}

/// Every credential set maps to the same directory bucket.
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl StoreConnector for LocalConnector {
    async fn connect(&self, _creds: &StorageCredentials) -> Result<Arc<dyn ObjectStore>, DeployError> {
        tracing::warn!(
            "Publishing into local directory bucket {}, credentials are not used",
            self.root.display()
        );
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| DeployError::FileAccess {
                path: self.root.clone(),
                source,
            })?;
        Ok(Arc::new(LocalObjectStore::new(self.root.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::cancel::CancelToken;
    use crate::sys::remote::{RemoteStorageSync, SyncProgressEvent, UploadOptions};

    #[tokio::test]
    async fn memory_store_is_prefix_bound() {
        let store = InMemoryObjectStore::new();
        let meta = ObjectMeta::default();
        store.put("app/index.html", b"a".to_vec(), &meta).await.unwrap();
        store.put("app2/index.html", b"b".to_vec(), &meta).await.unwrap();

        assert!(store.exists("app/").await.unwrap());
        assert!(!store.exists("ap/").await.unwrap());
        assert_eq!(store.delete_prefix("app/").await.unwrap(), 1);
        assert!(!store.exists("app/").await.unwrap());
        assert_eq!(store.keys().await, vec!["app2/index.html".to_string()]);
        assert_eq!(store.delete_prefix("app/").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn local_store_round_trips_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());
        let meta = ObjectMeta::default();

        assert!(!store.exists("site/").await.unwrap());
        store.put("site/css/app.css", b"body{}".to_vec(), &meta).await.unwrap();
        store.put("site/index.html", b"<html>".to_vec(), &meta).await.unwrap();
        store.put("other/index.html", b"<html>".to_vec(), &meta).await.unwrap();
        assert!(store.exists("site/").await.unwrap());
        assert_eq!(
            std::fs::read(dir.path().join("site/css/app.css")).unwrap(),
            b"body{}"
        );

        assert_eq!(store.delete_prefix("site/").await.unwrap(), 2);
        assert!(!store.exists("site/").await.unwrap());
        assert!(store.exists("other/").await.unwrap());
        assert_eq!(store.delete_prefix("site/").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn local_store_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());
        let meta = ObjectMeta::default();
        store.put("s/a.txt", b"one".to_vec(), &meta).await.unwrap();
        store.put("s/a.txt", b"two".to_vec(), &meta).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("s/a.txt")).unwrap(), b"two");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("s"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("a.txt")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_of_sibling_tmp_keys_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path().to_path_buf()));

        for _round in 0..10 {
            let mut puts = Vec::new();
            for i in 0..20 {
                for key in [format!("s/f{:02}.js", i), format!("s/f{:02}.js.tmp", i)] {
                    let store = store.clone();
                    puts.push(tokio::spawn(async move {
                        store
                            .put(&key, key.as_bytes().to_vec(), &ObjectMeta::default())
                            .await
                    }));
                }
            }
            for put in puts {
                put.await.unwrap().unwrap();
            }
            for i in 0..20 {
                for key in [format!("s/f{:02}.js", i), format!("s/f{:02}.js.tmp", i)] {
                    assert_eq!(std::fs::read(dir.path().join(&key)).unwrap(), key.as_bytes());
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sync_into_directory_bucket_is_byte_exact() {
        let dist = tempfile::tempdir().unwrap();
        let mut expected = Vec::new();
        for i in 0..40 {
            for rel in [
                format!("assets/chunk{:02}.js", i),
                format!("assets/chunk{:02}.js.tmp", i),
                format!("pages/p{:02}/index.html", i),
            ] {
                let body = format!("{} {}", rel, "x".repeat(i * 64));
                let path = dist.path().join(&rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, &body).unwrap();
                expected.push((rel, body));
            }
        }

        let bucket = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(bucket.path().to_path_buf()));
        let sync = RemoteStorageSync::new(store)
            .with_options(UploadOptions::default().with_max_concurrency(16));

        for _round in 0..3 {
            let summary = sync
                .upload_dir(dist.path(), "site", &CancelToken::never(), &|_: &SyncProgressEvent| {})
                .await
                .unwrap();
            assert_eq!(summary.uploaded, expected.len());

            for (rel, body) in &expected {
                let stored = std::fs::read(bucket.path().join("site").join(rel)).unwrap();
                assert_eq!(stored, body.as_bytes(), "{}", rel);
            }
            let files = WalkDir::new(bucket.path())
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .count();
            assert_eq!(files, expected.len());
        }
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("bucket"));
        let meta = ObjectMeta::default();
        for key in ["../evil.txt", "/etc/passwd", "a/../../b"] {
            let err = store.put(key, Vec::new(), &meta).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "{}", key);
        }
    }

    #[tokio::test]
    async fn clearing_whole_bucket_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().to_path_buf());
        let meta = ObjectMeta::default();
        store.put("a/x", b"1".to_vec(), &meta).await.unwrap();
        store.put("y", b"2".to_vec(), &meta).await.unwrap();
        assert_eq!(store.delete_prefix("").await.unwrap(), 2);
        assert!(dir.path().exists());
        assert!(!store.exists("").await.unwrap());
    }
}
