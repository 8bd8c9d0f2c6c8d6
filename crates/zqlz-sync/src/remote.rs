//! Seams to the outside world: the remote connection store and the session

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zqlz_core::{
    ConnectionChanges, ConnectionRecordForTransport, RemoteChange, Result, SnapshotEntry,
};

/// A partial update sent upstream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundUpdate {
    pub id: Uuid,
    pub changes: ConnectionChanges,
}

/// Everything one local transaction sends to the remote store
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundBatch {
    pub creates: Vec<ConnectionRecordForTransport>,
    pub updates: Vec<OutboundUpdate>,
    pub removes: Vec<Uuid>,
}

impl OutboundBatch {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.removes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.removes.len()
    }
}

/// The cloud copy of the connection collection
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Given the local `{id, updated_at}` pairs, return what has to change
    /// locally, in the order it must be applied
    async fn diff(&self, snapshot: &[SnapshotEntry]) -> Result<Vec<RemoteChange>>;

    async fn create(&self, record: ConnectionRecordForTransport) -> Result<()>;

    async fn update(&self, id: Uuid, changes: ConnectionChanges) -> Result<()>;

    async fn remove(&self, ids: Vec<Uuid>) -> Result<()>;

    /// Send a whole batch. Creates go first, then updates, then one
    /// removal for every deleted id.
    async fn push_batch(&self, batch: OutboundBatch) -> Result<()> {
        try_join_all(batch.creates.into_iter().map(|record| self.create(record))).await?;
        try_join_all(
            batch
                .updates
                .into_iter()
                .map(|update| self.update(update.id, update.changes)),
        )
        .await?;
        if !batch.removes.is_empty() {
            self.remove(batch.removes).await?;
        }
        Ok(())
    }
}

/// Authentication and connectivity, as far as sync cares
pub trait SessionState: Send + Sync {
    /// Bearer token of the signed-in user
    fn bearer_token(&self) -> Option<String>;

    fn is_online(&self) -> bool;
}

/// Session state held in memory and updated by the app
pub struct StaticSession {
    token: RwLock<Option<String>>,
    online: RwLock<bool>,
}

impl StaticSession {
    /// A signed-out session that is online
    pub fn new() -> Self {
        Self {
            token: RwLock::new(None),
            online: RwLock::new(true),
        }
    }

    pub fn authenticated(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(Some(token.into()));
        session
    }

    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    pub fn set_online(&self, online: bool) {
        *self.online.write() = online;
    }
}

impl Default for StaticSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState for StaticSession {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    fn is_online(&self) -> bool {
        *self.online.read()
    }
}
