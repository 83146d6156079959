// src/deployer.rs

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{DeployConfig, OverwritePolicy};
use crate::error::DeployError;
use crate::sys::cancel::CancelToken;
use crate::sys::credentials::CredentialProvider;
use crate::sys::props::ConnectionProperties;
use crate::sys::remote::{RemoteStorageSync, SyncProgressEvent};
use crate::sys::traits::{ActionDeployer, StoreConnector, TokenVendor};

pub struct DeploymentOrchestrator {
    credentials: CredentialProvider,
    connector: Arc<dyn StoreConnector>,
    actions: Arc<dyn ActionDeployer>,
}

impl DeploymentOrchestrator {
    pub fn new(
        vendor: Arc<dyn TokenVendor>,
        connector: Arc<dyn StoreConnector>,
        actions: Arc<dyn ActionDeployer>,
    ) -> Self {
        Self {
            credentials: CredentialProvider::new(vendor),
            connector,
            actions,
        }
    }

    /// Publishes the built web assets and returns the public URL.
    ///
    /// Every precondition is checked before any credential or network call.
    pub async fn deploy_web(
        &self,
        config: &DeployConfig,
        cancel: &CancelToken,
        on_progress: &(dyn Fn(&SyncProgressEvent) + Send + Sync),
    ) -> Result<String, DeployError> {
        if !config.app.has_frontend {
            return Err(DeployError::Config(
                "cannot deploy web, app has no frontend".into(),
            ));
        }
        check_build_output(&config.web.dist_prod).await?;
        let namespace = config.namespace()?;
        let hostname = config
            .app
            .hostname
            .as_deref()
            .ok_or_else(|| DeployError::missing("hostname"))?;
        let folder = config.folder()?;
        let source = config.credential_source()?;

        let creds = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            creds = self.credentials.get_credentials(&source) => creds?,
        };

        ensure_live(cancel)?;
        let store = self.connector.connect(&creds).await?;
        let sync = RemoteStorageSync::new(store).with_options(config.upload_options());

        if sync.folder_exists(&folder).await? {
            match config.storage.overwrite {
                OverwritePolicy::Clear => {
                    warn!("An existing deployment under '{}' will be overwritten", folder);
                    ensure_live(cancel)?;
                    sync.empty_folder(&folder).await?;
                }
                OverwritePolicy::Refuse => {
                    return Err(DeployError::ExistingDeployment { prefix: folder });
                }
            }
        }

        ensure_live(cancel)?;
        let summary = sync
            .upload_dir(&config.web.dist_prod, &folder, cancel, on_progress)
            .await?;

        let url = format!("https://{}.{}/index.html", namespace, hostname);
        info!("Deployed {} file(s) to {}", summary.uploaded, url);
        Ok(url)
    }

    /// Deploys packaged serverless actions through the external runtime CLI.
    pub async fn deploy_actions(
        &self,
        manifest: &Path,
        props: &ConnectionProperties,
        extra_args: &[String],
    ) -> Result<(), DeployError> {
        let is_file = tokio::fs::metadata(manifest)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(DeployError::Config(format!(
                "missing manifest file {}",
                manifest.display()
            )));
        }
        self.actions.deploy(manifest, props, extra_args).await
    }
}

fn ensure_live(cancel: &CancelToken) -> Result<(), DeployError> {
    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }
    Ok(())
}

/// The build output must exist, be a directory and hold at least one entry.
async fn check_build_output(dist: &Path) -> Result<(), DeployError> {
    let missing = || {
        DeployError::Config(format!(
            "missing files in {}, maybe you forgot to build your UI?",
            dist.display()
        ))
    };
    let is_dir = tokio::fs::metadata(dist).await.is_ok_and(|meta| meta.is_dir());
    if !is_dir {
        return Err(missing());
    }
    let access_err = |source: std::io::Error| DeployError::FileAccess {
        path: dist.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dist).await.map_err(access_err)?;
    if entries.next_entry().await.map_err(access_err)?.is_none() {
        return Err(missing());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StorageBackend, StorageConfig, WebConfig};
    use crate::sys::cancel::cancellation;
    use crate::sys::credentials::FederationParams;
    use crate::sys::remote::CachePolicy;
    use crate::sys::secrets::StorageCredentials;
    use crate::sys::storage::{InMemoryConnector, InMemoryObjectStore};
    use crate::sys::traits::{ObjectMeta, ObjectStore};
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingVendor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenVendor for CountingVendor {
        async fn fetch(&self, _params: &FederationParams) -> Result<StorageCredentials, DeployError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StorageCredentials::temporary(
                "vended",
                "secret".into(),
                "token".into(),
                Utc::now() + Duration::hours(1),
            ))
        }
    }

    struct CountingConnector {
        inner: InMemoryConnector,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StoreConnector for CountingConnector {
        async fn connect(&self, creds: &StorageCredentials) -> Result<Arc<dyn ObjectStore>, DeployError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.connect(creds).await
        }
    }

    #[derive(Default)]
    struct RecordingActions {
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    #[async_trait]
    impl ActionDeployer for RecordingActions {
        async fn deploy(
            &self,
            manifest: &Path,
            _props: &ConnectionProperties,
            extra_args: &[String],
        ) -> Result<(), DeployError> {
            self.calls
                .lock()
                .unwrap()
                .push((manifest.to_path_buf(), extra_args.to_vec()));
            Ok(())
        }
    }

    struct Harness {
        store: Arc<InMemoryObjectStore>,
        vendor: Arc<CountingVendor>,
        connector: Arc<CountingConnector>,
        actions: Arc<RecordingActions>,
        orchestrator: DeploymentOrchestrator,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryObjectStore::new());
        let vendor = Arc::new(CountingVendor::default());
        let connector = Arc::new(CountingConnector {
            inner: InMemoryConnector::new(store.clone()),
            calls: AtomicUsize::new(0),
        });
        let actions = Arc::new(RecordingActions::default());
        let orchestrator = DeploymentOrchestrator::new(vendor.clone(), connector.clone(), actions.clone());
        Harness {
            store,
            vendor,
            connector,
            actions,
            orchestrator,
        }
    }

    fn config(dist: &Path, cache_dir: &Path) -> DeployConfig {
        DeployConfig {
            app: AppConfig {
                has_frontend: true,
                hostname: Some("static.test".into()),
                cache: CachePolicy::default(),
            },
            web: WebConfig {
                dist_prod: dist.to_path_buf(),
            },
            storage: StorageConfig {
                folder: None,
                tvm_url: Some("https://tvm.test".into()),
                creds_cache_file: Some(cache_dir.join("creds.json")),
                creds: None,
                overwrite: OverwritePolicy::Clear,
                max_concurrency: 4,
                backend: StorageBackend::Directory(cache_dir.join("bucket")),
            },
            runtime: ConnectionProperties {
                api_host: Some("https://runtime.test".into()),
                namespace: Some("ns1".into()),
                auth_key: Some("uuid:key".into()),
                gateway_access_token: None,
            },
        }
    }

    fn build_output(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for rel in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, rel.as_bytes()).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn deploys_into_empty_namespace() {
        let h = harness();
        let dist = build_output(&["index.html", "app.js", "style.css"]);
        let scratch = tempfile::tempdir().unwrap();
        let cfg = config(dist.path(), scratch.path());
        let events = Mutex::new(Vec::new());
        let on_progress = |e: &SyncProgressEvent| events.lock().unwrap().push(e.relative_path.clone());

        let url = h
            .orchestrator
            .deploy_web(&cfg, &CancelToken::never(), &on_progress)
            .await
            .unwrap();

        assert_eq!(url, "https://ns1.static.test/index.html");
        assert_eq!(events.lock().unwrap().len(), 3);
        assert_eq!(
            h.store.keys().await,
            vec!["ns1/app.js", "ns1/index.html", "ns1/style.css"]
        );
        assert_eq!(h.vendor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_objects_are_cleared_before_upload() {
        let h = harness();
        let meta = ObjectMeta::default();
        h.store.put("ns1/old.html", b"old".to_vec(), &meta).await.unwrap();
        h.store.put("ns1/assets/old.js", b"old".to_vec(), &meta).await.unwrap();
        h.store.put("ns10/keep.html", b"keep".to_vec(), &meta).await.unwrap();

        let dist = build_output(&["index.html", "assets/new.js"]);
        let scratch = tempfile::tempdir().unwrap();
        h.orchestrator
            .deploy_web(&config(dist.path(), scratch.path()), &CancelToken::never(), &|_: &SyncProgressEvent| {})
            .await
            .unwrap();

        assert_eq!(
            h.store.keys().await,
            vec!["ns1/assets/new.js", "ns1/index.html", "ns10/keep.html"]
        );
    }

    #[tokio::test]
    async fn refuse_policy_leaves_existing_deployment() {
        let h = harness();
        h.store.put("ns1/old.html", b"old".to_vec(), &ObjectMeta::default()).await.unwrap();
        let dist = build_output(&["index.html"]);
        let scratch = tempfile::tempdir().unwrap();
        let mut cfg = config(dist.path(), scratch.path());
        cfg.storage.overwrite = OverwritePolicy::Refuse;

        let err = h
            .orchestrator
            .deploy_web(&cfg, &CancelToken::never(), &|_: &SyncProgressEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ExistingDeployment { ref prefix } if prefix == "ns1"));
        assert_eq!(h.store.keys().await, vec!["ns1/old.html"]);
    }

    #[tokio::test]
    async fn missing_or_empty_build_fails_before_any_io() {
        let h = harness();
        let scratch = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let file_dist = scratch.path().join("not-a-dir");
        std::fs::write(&file_dist, "x").unwrap();

        for dist in [scratch.path().join("nope"), empty.path().to_path_buf(), file_dist] {
            let err = h
                .orchestrator
                .deploy_web(&config(&dist, scratch.path()), &CancelToken::never(), &|_: &SyncProgressEvent| {})
                .await
                .unwrap_err();
            assert!(matches!(err, DeployError::Config(_)), "{}", dist.display());
        }
        assert_eq!(h.vendor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_frontend_is_rejected() {
        let h = harness();
        let dist = build_output(&["index.html"]);
        let scratch = tempfile::tempdir().unwrap();
        let mut cfg = config(dist.path(), scratch.path());
        cfg.app.has_frontend = false;
        let err = h
            .orchestrator
            .deploy_web(&cfg, &CancelToken::never(), &|_: &SyncProgressEvent| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no frontend"));
        assert_eq!(h.vendor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn static_credentials_never_touch_federation() {
        let h = harness();
        let dist = build_output(&["index.html"]);
        let scratch = tempfile::tempdir().unwrap();
        let mut cfg = config(dist.path(), scratch.path());
        cfg.storage.creds = Some(StorageCredentials::fixed("AKIA", "secret".into()));

        h.orchestrator
            .deploy_web(&cfg, &CancelToken::never(), &|_: &SyncProgressEvent| {})
            .await
            .unwrap();
        assert_eq!(h.vendor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_hostname_names_the_field() {
        let h = harness();
        let dist = build_output(&["index.html"]);
        let scratch = tempfile::tempdir().unwrap();
        let mut cfg = config(dist.path(), scratch.path());
        cfg.app.hostname = None;
        let err = h
            .orchestrator
            .deploy_web(&cfg, &CancelToken::never(), &|_: &SyncProgressEvent| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("hostname"));
    }

    #[tokio::test]
    async fn cancelled_deployment_stops_before_storage() {
        let h = harness();
        let dist = build_output(&["index.html"]);
        let scratch = tempfile::tempdir().unwrap();
        let (handle, token) = cancellation();
        handle.cancel();

        let err = h
            .orchestrator
            .deploy_web(&config(dist.path(), scratch.path()), &token, &|_: &SyncProgressEvent| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
        assert_eq!(h.connector.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn actions_require_manifest_then_delegate() {
        let h = harness();
        let props = ConnectionProperties::default();
        let err = h
            .orchestrator
            .deploy_actions(Path::new("/no/such/manifest.yml"), &props, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));

        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.yml");
        std::fs::write(&manifest, "packages: {}").unwrap();
        h.orchestrator
            .deploy_actions(&manifest, &props, &["--verbose".to_string()])
            .await
            .unwrap();
        let calls = h.actions.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (manifest.clone(), vec!["--verbose".to_string()]));
    }
}
