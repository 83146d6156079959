// src/sys/credentials.rs

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::sys::blocking::run_blocking;
use crate::sys::secrets::StorageCredentials;
use crate::sys::traits::TokenVendor;

/// Platform identity exchanged for temporary storage credentials.
#[derive(Clone, Debug)]
pub struct FederationParams {
    pub namespace: String,
    pub auth_key: SecretString,
    pub api_url: String,
    pub cache_file: Option<PathBuf>,
}

pub enum CredentialSource {
    /// Caller-supplied credentials. The federation service is never contacted.
    Static(StorageCredentials),
    Federated(FederationParams),
}

/// On-disk cache record. Plain strings on purpose: this only lives between
/// reading/writing the file and building `StorageCredentials`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expiration: DateTime<Utc>,
    namespace_scope: String,
}

impl CachedCredentials {
    fn into_credentials(self) -> StorageCredentials {
        let creds = StorageCredentials::fixed(self.access_key_id, self.secret_access_key);
        let creds = match self.session_token {
            Some(token) => creds.with_session_token(token),
            None => creds,
        };
        creds.with_expiration(self.expiration)
    }
}

pub struct CredentialProvider {
    vendor: Arc<dyn TokenVendor>,
}

impl CredentialProvider {
    pub fn new(vendor: Arc<dyn TokenVendor>) -> Self {
        Self { vendor }
    }

    pub async fn get_credentials(&self, source: &CredentialSource) -> Result<StorageCredentials, DeployError> {
        match source {
            CredentialSource::Static(creds) => Ok(creds.clone()),
            CredentialSource::Federated(params) => self.federated(params).await,
        }
    }

    async fn federated(&self, params: &FederationParams) -> Result<StorageCredentials, DeployError> {
        if let Some(cache_file) = &params.cache_file {
            if let Some(cached) = read_cache(cache_file, &params.namespace, Utc::now()).await {
                info!("Using cached storage credentials for namespace {}", params.namespace);
                return Ok(cached);
            }
        }

        info!("Requesting temporary storage credentials for namespace {}", params.namespace);
        let creds = self.vendor.fetch(params).await?;

        if let (Some(cache_file), Some(_)) = (&params.cache_file, creds.expiration) {
            // A failed cache write costs a refetch next time, nothing more.
            if let Err(e) = write_cache(cache_file, &params.namespace, &creds).await {
                warn!("Failed to cache credentials at {}: {}", cache_file.display(), e);
            }
        }

        Ok(creds)
    }
}

/// Returns unexpired credentials scoped to `namespace`, or None on any miss.
async fn read_cache(path: &Path, namespace: &str, now: DateTime<Utc>) -> Option<StorageCredentials> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Ignoring unreadable credential cache {}: {}", path.display(), e);
            return None;
        }
    };

    let record: CachedCredentials = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(e) => {
            warn!("Ignoring malformed credential cache {}: {}", path.display(), e);
            return None;
        }
    };

    if record.namespace_scope != namespace {
        debug!("Credential cache belongs to namespace {}, ignoring", record.namespace_scope);
        return None;
    }

    let creds = record.into_credentials();
    if creds.is_expired_at(now) {
        debug!("Cached credentials expired");
        return None;
    }
    Some(creds)
}

/// Atomic rename-on-write: concurrent writers race, last one wins, and no
/// reader ever sees a half-written file.
async fn write_cache(path: &Path, namespace: &str, creds: &StorageCredentials) -> std::io::Result<()> {
    let Some(expiration) = creds.expiration else {
        return Ok(());
    };
    let record = CachedCredentials {
        access_key_id: creds.access_key_id.clone(),
        secret_access_key: creds.use_secret(str::to_owned),
        session_token: creds.use_session_token(|t| t.map(str::to_owned)),
        expiration,
        namespace_scope: namespace.to_string(),
    };
    let json = serde_json::to_vec_pretty(&record)?;

    let target = path.to_path_buf();
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    run_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
}

/// Splits a `uuid:key` auth string for HTTP basic auth.
pub fn basic_auth_parts(auth_key: &SecretString) -> (String, Option<String>) {
    match auth_key.expose_secret().split_once(':') {
        Some((user, pass)) => (user.to_string(), Some(pass.to_string())),
        None => (auth_key.expose_secret().clone(), None),
    }
}
