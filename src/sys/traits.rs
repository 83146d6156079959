// src/sys/traits.rs

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::error::{DeployError, StorageError};
use crate::sys::credentials::FederationParams;
use crate::sys::props::ConnectionProperties;
use crate::sys::secrets::StorageCredentials;

// ==============================================================================
// 1. Object Storage (Prefix-Addressed)
// ==============================================================================

/// Metadata sent alongside every uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// True iff at least one object key starts with `prefix`.
    async fn exists(&self, prefix: &str) -> Result<bool, StorageError>;

    /// Deletes every object whose key starts with `prefix` and returns how many went.
    /// An empty prefix match is a no-op, not an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    /// Writes `content` at `key`, replacing any previous object.
    async fn put(&self, key: &str, content: Vec<u8>, meta: &ObjectMeta) -> Result<(), StorageError>;
}

/// Opens an object store session bound to a set of credentials.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, creds: &StorageCredentials) -> Result<Arc<dyn ObjectStore>, DeployError>;
}

// ==============================================================================
// 2. Credential Federation
// ==============================================================================

#[async_trait]
pub trait TokenVendor: Send + Sync {
    /// Exchanges platform identity for temporary storage credentials.
    /// Failures surface as `DeployError::CredentialFetch`.
    async fn fetch(&self, params: &FederationParams) -> Result<StorageCredentials, DeployError>;
}

// ==============================================================================
// 3. Serverless Action Deployment (External CLI)
// ==============================================================================

#[async_trait]
pub trait ActionDeployer: Send + Sync {
    async fn deploy(
        &self,
        manifest: &Path,
        props: &ConnectionProperties,
        extra_args: &[String],
    ) -> Result<(), DeployError>;
}
