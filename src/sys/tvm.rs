// src/sys/tvm.rs
//
// HTTP client for the token vending service that trades platform identity
// for temporary storage credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::DeployError;
use crate::sys::credentials::{basic_auth_parts, FederationParams};
use crate::sys::secrets::StorageCredentials;
use crate::sys::traits::TokenVendor;

const STORAGE_ENDPOINT: &str = "aws/s3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VendedCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

pub struct HttpTokenVendor {
    client: Client,
}

impl HttpTokenVendor {
    pub fn new() -> Result<Self, DeployError> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DeployError::CredentialFetch(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

pub fn credentials_url(api_url: &str, namespace: &str) -> String {
    format!("{}/{}/{}", api_url.trim_end_matches('/'), STORAGE_ENDPOINT, namespace)
}

#[async_trait]
impl TokenVendor for HttpTokenVendor {
    async fn fetch(&self, params: &FederationParams) -> Result<StorageCredentials, DeployError> {
        let url = credentials_url(&params.api_url, &params.namespace);
        let (user, pass) = basic_auth_parts(&params.auth_key);

        let response = self
            .client
            .post(&url)
            .basic_auth(user, pass)
            .send()
            .await
            .map_err(|e| DeployError::CredentialFetch(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::CredentialFetch(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        let vended: VendedCredentials = response
            .json()
            .await
            .map_err(|e| DeployError::CredentialFetch(format!("invalid response from {}: {}", url, e)))?;

        tracing::debug!("Vended credentials valid until {}", vended.expiration);
        Ok(StorageCredentials::temporary(
            vended.access_key_id,
            vended.secret_access_key,
            vended.session_token,
            vended.expiration,
        ))
    }
}
