// src/config.rs

use secrecy::Secret;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::DeployError;
use crate::sys::credentials::{CredentialSource, FederationParams};
use crate::sys::props::{ConnectionProperties, PropertyResolver};
use crate::sys::remote::{CachePolicy, DEFAULT_UPLOAD_CONCURRENCY, UploadOptions};
use crate::sys::s3::S3Settings;
use crate::sys::secrets::StorageCredentials;

pub const DEFAULT_CREDS_CACHE_FILE: &str = ".aws.tmp.creds.json";
pub const DEFAULT_REGION: &str = "us-east-1";

/// What to do when the target prefix already holds a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Warn, clear the prefix, then upload.
    #[default]
    Clear,
    /// Fail with `ExistingDeployment` and leave the remote untouched.
    Refuse,
}

/// Where uploaded objects land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// An S3 bucket, written with the resolved credentials.
    S3(S3Settings),
    /// A local directory bucket for development. Credentials are resolved but unused.
    Directory(PathBuf),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub has_frontend: bool,
    pub hostname: Option<String>,
    pub cache: CachePolicy,
}

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub dist_prod: PathBuf,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Remote prefix. Defaults to the runtime namespace.
    pub folder: Option<String>,
    pub tvm_url: Option<String>,
    pub creds_cache_file: Option<PathBuf>,
    /// When set, federation is skipped entirely.
    pub creds: Option<StorageCredentials>,
    pub overwrite: OverwritePolicy,
    pub max_concurrency: usize,
    pub backend: StorageBackend,
}

#[derive(Clone, Debug)]
pub struct DeployConfig {
    pub app: AppConfig,
    pub web: WebConfig,
    pub storage: StorageConfig,
    pub runtime: ConnectionProperties,
}

impl DeployConfig {
    /// Snapshots the process environment once and builds the config from it.
    pub fn load() -> Result<Self, DeployError> {
        Self::from_resolver(&PropertyResolver::from_env())
    }

    pub fn from_resolver(resolver: &PropertyResolver) -> Result<Self, DeployError> {
        let runtime = resolver.resolve()?;
        let env = Env(resolver.vars());

        let defaults = CachePolicy::default();
        let cache = CachePolicy {
            html: env.number("WEBDEPLOY_HTML_CACHE", defaults.html)?,
            js: env.number("WEBDEPLOY_JS_CACHE", defaults.js)?,
            css: env.number("WEBDEPLOY_CSS_CACHE", defaults.css)?,
            image: env.number("WEBDEPLOY_IMAGE_CACHE", defaults.image)?,
        };

        let overwrite = match env.get("WEBDEPLOY_OVERWRITE").map(str::to_ascii_lowercase).as_deref() {
            None | Some("clear") => OverwritePolicy::Clear,
            Some("refuse") => OverwritePolicy::Refuse,
            Some(other) => {
                return Err(DeployError::Config(format!(
                    "WEBDEPLOY_OVERWRITE must be 'clear' or 'refuse', got '{}'",
                    other
                )));
            }
        };

        // Static credentials come as a pair; half a pair is a typo, not a request for federation.
        let creds = match (env.get("AWS_ACCESS_KEY_ID"), env.get("AWS_SECRET_ACCESS_KEY")) {
            (Some(id), Some(secret)) => {
                let creds = StorageCredentials::fixed(id, secret.to_string());
                Some(match env.get("AWS_SESSION_TOKEN") {
                    Some(token) => creds.with_session_token(token.to_string()),
                    None => creds,
                })
            }
            (Some(_), None) => return Err(DeployError::missing("AWS_SECRET_ACCESS_KEY")),
            (None, Some(_)) => return Err(DeployError::missing("AWS_ACCESS_KEY_ID")),
            (None, None) => None,
        };

        let backend = match env.get("WEBDEPLOY_BUCKET") {
            Some(bucket) => {
                let settings = S3Settings::new(bucket, env.get("WEBDEPLOY_REGION").unwrap_or(DEFAULT_REGION));
                StorageBackend::S3(match env.get("WEBDEPLOY_S3_ENDPOINT") {
                    Some(endpoint) => settings.with_endpoint(endpoint),
                    None => settings,
                })
            }
            None => StorageBackend::Directory(PathBuf::from(
                env.get("WEBDEPLOY_BUCKET_DIR").unwrap_or("bucket"),
            )),
        };

        Ok(Self {
            app: AppConfig {
                has_frontend: env.flag("WEBDEPLOY_HAS_FRONTEND", true)?,
                hostname: env.get("WEBDEPLOY_HOSTNAME").map(str::to_owned),
                cache,
            },
            web: WebConfig {
                dist_prod: PathBuf::from(env.get("WEBDEPLOY_DIST").unwrap_or("dist")),
            },
            storage: StorageConfig {
                folder: env.get("WEBDEPLOY_FOLDER").map(str::to_owned),
                tvm_url: env.get("WEBDEPLOY_TVM_URL").map(str::to_owned),
                creds_cache_file: Some(PathBuf::from(
                    env.get("WEBDEPLOY_CREDS_CACHE_FILE").unwrap_or(DEFAULT_CREDS_CACHE_FILE),
                )),
                creds,
                overwrite,
                max_concurrency: env.number("WEBDEPLOY_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY)?,
                backend,
            },
            runtime,
        })
    }

    pub fn namespace(&self) -> Result<&str, DeployError> {
        self.runtime
            .namespace
            .as_deref()
            .ok_or_else(|| DeployError::missing("namespace"))
    }

    /// Remote prefix for the web assets.
    pub fn folder(&self) -> Result<String, DeployError> {
        match &self.storage.folder {
            Some(folder) => Ok(folder.clone()),
            None => self.namespace().map(str::to_owned),
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions::default()
            .with_max_concurrency(self.storage.max_concurrency)
            .with_cache_policy(self.app.cache)
    }

    /// Static credentials win; otherwise federation needs namespace, auth and tvm url.
    pub fn credential_source(&self) -> Result<CredentialSource, DeployError> {
        if let Some(creds) = &self.storage.creds {
            return Ok(CredentialSource::Static(creds.clone()));
        }
        let namespace = self.namespace()?.to_string();
        let auth_key = self
            .runtime
            .auth_key
            .clone()
            .ok_or_else(|| DeployError::missing("auth"))?;
        let api_url = self
            .storage
            .tvm_url
            .clone()
            .ok_or_else(|| DeployError::missing("tvmUrl"))?;
        Ok(CredentialSource::Federated(FederationParams {
            namespace,
            auth_key: Secret::new(auth_key),
            api_url,
            cache_file: self.storage.creds_cache_file.clone(),
        }))
    }
}

/// Non-empty lookups over an environment snapshot.
struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    fn number<T: std::str::FromStr>(&self, name: &str, default: T) -> Result<T, DeployError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| DeployError::Config(format!("{} must be a number, got '{}'", name, raw))),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, DeployError> {
        match self.get(name).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes") => Ok(true),
            Some("0" | "false" | "no") => Ok(false),
            Some(other) => Err(DeployError::Config(format!(
                "{} must be true or false, got '{}'",
                name, other
            ))),
        }
    }
}
