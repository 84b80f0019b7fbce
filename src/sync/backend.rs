// SPDX-License-Identifier: GPL-3.0-only
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::store::{QueueRecord, Snapshot};
use crate::sync::error::SyncError;
use crate::sync::traits::RemoteStateClient;
use crate::utils::{endpoint_url, validate_base_url};

/// Remote state service reached over HTTP
///
/// `GET {base}/profiles/{id}/state` returns `{"entries": {...}}`;
/// `PATCH {base}/profiles/{id}/entries` takes `{"device_id", "updates": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteStateClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    device_id: String,
}

impl HttpRemoteStateClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        device_id: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let base_url = validate_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("anime-va-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            device_id,
        })
    }

    fn build_request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<reqwest::RequestBuilder, SyncError> {
        let url = endpoint_url(&self.base_url, segments)
            .map_err(|e| SyncError::Request(e.to_string()))?;
        let mut request = self.client.request(method, url);

        if let Some(ref key) = self.api_key {
            request = request.header("X-API-Key", key);
        }

        Ok(request)
    }
}

#[derive(Serialize)]
struct PushRequest<'a> {
    device_id: &'a str,
    updates: &'a [QueueRecord],
}

#[derive(Deserialize)]
struct StateResponse {
    #[serde(default)]
    entries: Option<Snapshot>,
}

async fn status_error(response: reqwest::Response) -> SyncError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    SyncError::Status { status, body }
}

#[async_trait]
impl RemoteStateClient for HttpRemoteStateClient {
    async fn fetch_state(&self, profile_id: &str) -> Result<Snapshot, SyncError> {
        debug!(profile = %profile_id, "Fetching remote state");

        let response = self
            .build_request(Method::GET, &["profiles", profile_id, "state"])?
            .send()
            .await?;

        if !response.status().is_success() {
            let err = status_error(response).await;
            warn!(profile = %profile_id, error = %err, "Failed to fetch remote state");
            return Err(err);
        }

        let payload: StateResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        let entries = payload.entries.unwrap_or_default();

        info!(profile = %profile_id, count = entries.len(), "Fetched remote state");
        Ok(entries)
    }

    async fn push_updates(&self, profile_id: &str, batch: &[QueueRecord]) -> Result<(), SyncError> {
        let request = PushRequest {
            device_id: &self.device_id,
            updates: batch,
        };

        let response = self
            .build_request(Method::PATCH, &["profiles", profile_id, "entries"])?
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = status_error(response).await;
            error!(profile = %profile_id, count = batch.len(), error = %err, "Remote store rejected updates");
            return Err(err);
        }

        debug!(profile = %profile_id, count = batch.len(), "Pushed updates");
        Ok(())
    }
}
