// src/sys/s3.rs
//
// S3-compatible object store. Each deployment opens a client bound to the
// credentials the provider resolved, so federation and caching decide who
// writes to the bucket.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

use crate::error::{DeployError, StorageError};
use crate::sys::secrets::StorageCredentials;
use crate::sys::traits::{ObjectMeta, ObjectStore, StoreConnector};

const PROVIDER_NAME: &str = "webdeploy";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services. Switches to path-style addressing.
    pub endpoint: Option<String>,
    pub connect_timeout: Duration,
    /// Attempts per request including the first one.
    pub max_attempts: u32,
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_attempts: 3,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

pub struct S3Connector {
    settings: S3Settings,
}

impl S3Connector {
    pub fn new(settings: S3Settings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl StoreConnector for S3Connector {
    async fn connect(&self, creds: &StorageCredentials) -> Result<Arc<dyn ObjectStore>, DeployError> {
        let credentials = Credentials::new(
            creds.access_key_id.clone(),
            creds.use_secret(str::to_owned),
            creds.use_session_token(|t| t.map(str::to_owned)),
            creds.expiration.map(SystemTime::from),
            PROVIDER_NAME,
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.settings.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(self.settings.max_attempts.max(1)))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(self.settings.connect_timeout)
                    .build(),
            );
        if let Some(endpoint) = &self.settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.settings.endpoint.is_some())
            .build();

        debug!(
            "Opened bucket {} in {} as {}",
            self.settings.bucket, self.settings.region, creds.access_key_id
        );
        Ok(Arc::new(S3ObjectStore {
            client: S3Client::from_conf(s3_config),
            bucket: self.settings.bucket.clone(),
        }))
    }
}

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, prefix: &str) -> Result<bool, StorageError> {
        let page = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| classify(e, |message| StorageError::List {
                prefix: prefix.to_string(),
                message,
            }))?;
        Ok(!page.contents().is_empty())
    }

    /// Lists and deletes one page at a time until the prefix is empty.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let delete_err = |message: String| StorageError::Delete {
            key: prefix.to_string(),
            message,
        };
        let mut removed = 0;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .send()
                .await
                .map_err(|e| classify(e, |message| StorageError::List {
                    prefix: prefix.to_string(),
                    message,
                }))?;

            let ids = page
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| delete_err(e.to_string()))?;
            if ids.is_empty() {
                return Ok(removed);
            }
            let batch = ids.len();

            let delete = Delete::builder()
                .set_objects(Some(ids))
                .quiet(true)
                .build()
                .map_err(|e| delete_err(e.to_string()))?;
            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| classify(e, delete_err))?;

            if let Some(failure) = output.errors().first() {
                return Err(StorageError::Delete {
                    key: failure.key().unwrap_or(prefix).to_string(),
                    message: failure.message().unwrap_or("delete rejected").to_string(),
                });
            }
            removed += batch;
        }
    }

    async fn put(&self, key: &str, content: Vec<u8>, meta: &ObjectMeta) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content));
        if let Some(content_type) = &meta.content_type {
            request = request.content_type(content_type);
        }
        if let Some(cache_control) = &meta.cache_control {
            request = request.cache_control(cache_control);
        }
        request.send().await.map_err(|e| classify(e, |message| StorageError::Put {
            key: key.to_string(),
            message,
        }))?;
        Ok(())
    }
}

/// Transport failures mean the store is unreachable; anything the service
/// answered is specific to the object.
fn classify<E, R>(err: SdkError<E, R>, specific: impl FnOnce(String) -> StorageError) -> StorageError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StorageError::Connectivity { message }
        }
        _ => specific(message),
    }
}
