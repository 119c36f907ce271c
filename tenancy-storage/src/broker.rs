//! HTTP client for the lease broker

use crate::lease::{ConnectionDescriptor, LeaseBroker, LeaseGrant, LeaseId};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Lease broker reached over HTTP+JSON.
///
/// - `POST {base}/v1/leases` with the connection descriptor returns a
///   [`LeaseGrant`]
/// - `POST {base}/v1/leases/{id}/release` releases a lease
///
/// Any non-2xx answer is an error. Requests are not retried.
#[derive(Debug, Clone)]
pub struct HttpLeaseBroker {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpLeaseBroker {
    /// Create a broker client without a request timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, http_client))
    }

    /// Create a broker client whose requests fail after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(base_url, http_client))
    }

    pub fn with_client(base_url: impl Into<String>, http_client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LeaseBroker for HttpLeaseBroker {
    #[instrument(skip(self, descriptor), fields(owner = %descriptor.owner))]
    async fn acquire_lease(&self, descriptor: &ConnectionDescriptor) -> Result<LeaseGrant> {
        let url = format!("{}/v1/leases", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(descriptor)
            .send()
            .await
            .map_err(|e| Error::Lease(format!("Lease broker unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Lease broker rejected acquire");
            return Err(Error::Lease(format!(
                "Lease broker returned {} on acquire: {}",
                status, body
            )));
        }

        let grant: LeaseGrant = response
            .json()
            .await
            .map_err(|e| Error::Lease(format!("Invalid lease broker response: {}", e)))?;

        debug!(lease_id = %grant.lease_id, "Lease broker answered acquire");
        Ok(grant)
    }

    #[instrument(skip(self), fields(lease_id = %lease_id))]
    async fn release_lease(&self, lease_id: &LeaseId) -> Result<()> {
        let url = format!("{}/v1/leases/{}/release", self.base_url, lease_id);

        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::Lease(format!("Lease broker unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Lease(format!(
                "Lease broker returned {} on release: {}",
                status, body
            )));
        }

        Ok(())
    }
}
