//! Remote connection store over HTTP

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use zqlz_core::{
    ConnectionChanges, ConnectionRecordForTransport, RemoteChange, Result, SnapshotEntry,
    ZqlzError,
};

use crate::config::SyncConfig;
use crate::remote::{RemoteStore, SessionState};

#[derive(Serialize)]
struct SyncRequest<'a> {
    items: &'a [SnapshotEntry],
}

#[derive(Deserialize)]
struct SyncResponse {
    changes: Vec<RemoteChange>,
}

#[derive(Serialize)]
struct UpdateRequest {
    id: Uuid,
    changes: ConnectionChanges,
}

#[derive(Serialize)]
struct RemoveRequest {
    ids: Vec<Uuid>,
}

/// [`RemoteStore`] talking JSON to the zqlz API
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    session: Arc<dyn SessionState>,
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        session: Arc<dyn SessionState>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ZqlzError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn from_config(config: &SyncConfig, session: Arc<dyn SessionState>) -> Result<Self> {
        Self::new(config.api_base_url.clone(), session, config.request_timeout())
    }

    pub fn endpoint(&self, action: &str) -> String {
        format!("{}/connections/{}", self.base_url, action)
    }

    async fn post<B: Serialize + ?Sized>(&self, action: &str, body: &B) -> Result<Response> {
        let token = self
            .session
            .bearer_token()
            .ok_or(ZqlzError::NotAuthenticated)?;
        let url = self.endpoint(action);

        tracing::debug!(%url, "remote request");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(body)
            .send()
            .await
            .map_err(|e| ZqlzError::Transport(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ZqlzError::NotAuthenticated);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ZqlzError::Transport(format!(
                "{} returned {}: {}",
                action, status, body
            )));
        }

        Ok(response)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<R> {
        self.post(action, body)
            .await?
            .json()
            .await
            .map_err(|e| ZqlzError::Transport(format!("Invalid {} response: {}", action, e)))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn diff(&self, snapshot: &[SnapshotEntry]) -> Result<Vec<RemoteChange>> {
        let response: SyncResponse = self
            .post_json("sync", &SyncRequest { items: snapshot })
            .await?;
        Ok(response.changes)
    }

    async fn create(&self, record: ConnectionRecordForTransport) -> Result<()> {
        self.post("create", &record).await?;
        Ok(())
    }

    async fn update(&self, id: Uuid, changes: ConnectionChanges) -> Result<()> {
        self.post("update", &UpdateRequest { id, changes }).await?;
        Ok(())
    }

    async fn remove(&self, ids: Vec<Uuid>) -> Result<()> {
        self.post("remove", &RemoveRequest { ids }).await?;
        Ok(())
    }
}
