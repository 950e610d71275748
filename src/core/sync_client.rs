//! Client side of the external Sync Service
//!
//! The Sync Service owns CRDT reconciliation. The hub only forwards opaque
//! byte payloads and relays what comes back.

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::message_types::{base64_bytes, SyncRequest, SyncResponse, UpdateMessage};
use crate::error::{CollabError, Result};

#[async_trait]
pub trait SyncServiceClient: Send + Sync {
    /// Exchange a client state vector for the updates it is missing
    async fn sync(&self, document_id: &str, request: &SyncRequest) -> Result<SyncResponse>;

    /// Apply an update to the authoritative document
    async fn process_update(&self, document_id: &str, update: &UpdateMessage) -> Result<()>;

    /// Current state vector of the document
    async fn get_state_vector(&self, document_id: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StateVectorBody {
    #[serde(default, with = "base64_bytes")]
    state_vector: Vec<u8>,
}

/// JSON-over-HTTP Sync Service client
pub struct HttpSyncClient {
    client: Client,
    base_url: Url,
}

impl HttpSyncClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            CollabError::ConfigError(format!("invalid sync service url {}: {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CollabError::ConfigError(format!(
                "sync service url {} cannot be used as a base",
                base_url
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `{base}/documents/{id}/{action}`, with the id escaped as one segment
    fn endpoint(&self, document_id: &str, action: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CollabError::ConfigError("sync service url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["documents", document_id, action]);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CollabError::UpstreamError(format!(
            "sync service returned {}: {}",
            status, body
        )))
    }
}

#[async_trait]
impl SyncServiceClient for HttpSyncClient {
    async fn sync(&self, document_id: &str, request: &SyncRequest) -> Result<SyncResponse> {
        let url = self.endpoint(document_id, "sync")?;
        debug!("POST {}", url);
        let response = self.client.post(url).json(request).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn process_update(&self, document_id: &str, update: &UpdateMessage) -> Result<()> {
        let url = self.endpoint(document_id, "updates")?;
        debug!("POST {}", url);
        let response = self.client.post(url).json(update).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn get_state_vector(&self, document_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(document_id, "state-vector")?;
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let body: StateVectorBody = Self::check(response).await?.json().await?;
        Ok(body.state_vector)
    }
}

/// Installed when no Sync Service is configured; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSyncClient;

impl UnavailableSyncClient {
    fn unavailable<T>() -> Result<T> {
        Err(CollabError::UpstreamError(
            "sync service is not configured".to_string(),
        ))
    }
}

#[async_trait]
impl SyncServiceClient for UnavailableSyncClient {
    async fn sync(&self, _document_id: &str, _request: &SyncRequest) -> Result<SyncResponse> {
        Self::unavailable()
    }

    async fn process_update(&self, _document_id: &str, _update: &UpdateMessage) -> Result<()> {
        Self::unavailable()
    }

    async fn get_state_vector(&self, _document_id: &str) -> Result<Vec<u8>> {
        Self::unavailable()
    }
}
