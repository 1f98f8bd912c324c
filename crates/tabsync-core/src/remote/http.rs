//! HTTP backend
//!
//! JSON over HTTPS for uploads and downloads, websocket for the change feed.
//!
//! Endpoints (relative to `remote_url`):
//! - `GET  /v1/users/{user}/tab-groups`
//! - `PUT  /v1/users/{user}/tab-groups` with `{ "groups": [...], "overwrite": bool }`
//! - `GET  /health`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::feed::connect_change_feed;
use super::{ChangeEvent, RemoteStore};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::TabGroup;

#[derive(Serialize)]
struct UploadRequest<'a> {
    groups: &'a [TabGroup],
    overwrite: bool,
}

/// [`RemoteStore`] talking to the tabsync HTTP API
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    realtime_url: Option<String>,
    token: Option<String>,
    timeout: Duration,
}

impl HttpRemoteStore {
    /// Create a client with an explicit per-request timeout
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            realtime_url: None,
            token,
            timeout,
        })
    }

    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    /// Build from configuration; requires `remote_url`
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(ref base_url) = config.remote_url else {
            return Err(SyncError::Config("remote_url is not configured".to_string()));
        };

        let store = Self::new(
            base_url,
            config.auth_token.clone(),
            config.scheduler.request_timeout(),
        )?;

        Ok(match config.realtime_url {
            Some(ref url) => store.with_realtime_url(url.clone()),
            None => store,
        })
    }

    fn groups_url(&self, user_id: &str) -> String {
        format!("{}/v1/users/{}/tab-groups", self.base_url, user_id)
    }

    fn feed_url(&self, user_id: &str) -> Result<String> {
        let Some(ref url) = self.realtime_url else {
            return Err(SyncError::Config("realtime_url is not configured".to_string()));
        };
        let mut feed = Url::parse(url)
            .map_err(|e| SyncError::Config(format!("Invalid realtime_url '{}': {}", url, e)))?;
        {
            let mut query = feed.query_pairs_mut();
            query.append_pair("user_id", user_id);
            if let Some(ref token) = self.token {
                query.append_pair("token", token);
            }
        }
        Ok(feed.to_string())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn map_transport_error(&self, error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::Timeout(self.timeout)
        } else {
            SyncError::Transient(error.to_string())
        }
    }
}

/// Turn a non-success response into the matching error
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> SyncError {
    let message = format!("{}: {}", status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            SyncError::InvalidPayload(message)
        }
        StatusCode::PAYLOAD_TOO_LARGE | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::QuotaExceeded(message)
        }
        s if s.is_server_error() => SyncError::Transient(message),
        _ => SyncError::classify(message),
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upload_tab_groups(
        &self,
        user_id: &str,
        groups: &[TabGroup],
        overwrite: bool,
    ) -> Result<()> {
        debug!(user_id, count = groups.len(), overwrite, "Uploading tab groups");
        let request = self
            .client
            .put(self.groups_url(user_id))
            .json(&UploadRequest { groups, overwrite });

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        check_status(response).await?;
        Ok(())
    }

    async fn download_tab_groups(&self, user_id: &str) -> Result<Vec<TabGroup>> {
        let request = self.client.get(self.groups_url(user_id));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let response = check_status(response).await?;

        let groups: Vec<TabGroup> = response
            .json()
            .await
            .map_err(|e| SyncError::InvalidPayload(format!("Malformed group list: {}", e)))?;
        debug!(user_id, count = groups.len(), "Downloaded tab groups");
        Ok(groups)
    }

    async fn subscribe(&self, user_id: &str, capacity: usize) -> Result<mpsc::Receiver<ChangeEvent>> {
        let url = self.feed_url(user_id)?;
        connect_change_feed(&url, capacity, self.timeout).await
    }

    async fn ping(&self) -> Result<()> {
        let request = self.client.get(format!("{}/health", self.base_url));
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        check_status(response).await?;
        Ok(())
    }
}
