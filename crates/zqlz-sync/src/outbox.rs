//! Mutation outbox
//!
//! Local edits are committed to the record store first. Whatever was not
//! marked local-only is then turned into an [`OutboundBatch`] and pushed to
//! the remote store in the background. A failed push leaves the local commit
//! in place; it is reported on the event bus and not retried here.

use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;
use zqlz_core::{
    ConnectionChanges, ConnectionRecord, ConnectionUrl, Result, SyncMode, ZqlzError,
};
use zqlz_internal_storage::{RecordStore, StoreOp};

use crate::events::{EventBus, SyncEvent};
use crate::remote::{OutboundBatch, OutboundUpdate, RemoteStore};

/// A local edit of the connection collection
#[derive(Clone, Debug, PartialEq)]
pub enum LocalMutation {
    Insert(ConnectionRecord),
    Update { id: Uuid, changes: ConnectionChanges },
    Delete(Uuid),
}

impl LocalMutation {
    /// Reject connection strings that do not parse
    fn validate(&self) -> Result<()> {
        let raw = match self {
            LocalMutation::Insert(record) => Some(&record.connection_string),
            LocalMutation::Update { changes, .. } => changes.connection_string.as_ref(),
            LocalMutation::Delete(_) => None,
        };
        if let Some(raw) = raw {
            ConnectionUrl::parse(raw)?;
        }
        Ok(())
    }

    fn to_store_op(&self) -> StoreOp {
        match self {
            LocalMutation::Insert(record) => StoreOp::Upsert(record.clone()),
            LocalMutation::Update { id, changes } => StoreOp::Update {
                id: *id,
                changes: changes.clone(),
            },
            LocalMutation::Delete(id) => StoreOp::Delete(*id),
        }
    }
}

/// A mutation and whether it may leave the device
#[derive(Clone, Debug, PartialEq)]
pub struct MutationEnvelope {
    pub mutation: LocalMutation,
    pub cloud_sync: bool,
}

impl MutationEnvelope {
    pub fn new(mutation: LocalMutation) -> Self {
        Self {
            mutation,
            cloud_sync: true,
        }
    }

    /// Committed locally, never sent to the remote store
    pub fn local_only(mutation: LocalMutation) -> Self {
        Self {
            mutation,
            cloud_sync: false,
        }
    }
}

/// Mutations committed together in one store transaction
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalTransaction {
    envelopes: Vec<MutationEnvelope>,
}

impl LocalTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, envelope: MutationEnvelope) -> Self {
        self.envelopes.push(envelope);
        self
    }

    pub fn insert(self, record: ConnectionRecord) -> Self {
        self.push(MutationEnvelope::new(LocalMutation::Insert(record)))
    }

    pub fn update(self, id: Uuid, changes: ConnectionChanges) -> Self {
        self.push(MutationEnvelope::new(LocalMutation::Update { id, changes }))
    }

    pub fn delete(self, id: Uuid) -> Self {
        self.push(MutationEnvelope::new(LocalMutation::Delete(id)))
    }

    pub fn envelopes(&self) -> &[MutationEnvelope] {
        &self.envelopes
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

/// Background push of one committed transaction
#[derive(Debug)]
pub struct PushHandle {
    handle: JoinHandle<Result<usize>>,
}

impl PushHandle {
    /// Wait for the push to finish; yields the number of mutations sent
    pub async fn wait(self) -> Result<usize> {
        self.handle
            .await
            .map_err(|e| ZqlzError::Other(format!("push task failed: {}", e)))?
    }
}

/// What `commit` did
#[derive(Debug)]
pub struct CommitReceipt {
    /// Mutations written to the local store
    pub committed: usize,
    /// Set when something had to be sent upstream
    pub push: Option<PushHandle>,
}

pub struct MutationOutbox {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteStore>,
    events: EventBus,
}

impl MutationOutbox {
    pub fn new(store: Arc<dyn RecordStore>, remote: Arc<dyn RemoteStore>, events: EventBus) -> Self {
        Self {
            store,
            remote,
            events,
        }
    }

    /// Commit `transaction` locally, then push what may be synced.
    ///
    /// Must be called from within a tokio runtime. Errors come only from
    /// validation and the local commit, and nothing is stored when one is
    /// returned. Push failures are reported through the push handle and the
    /// event bus.
    #[tracing::instrument(skip_all, fields(count = transaction.envelopes.len()))]
    pub fn commit(&self, transaction: LocalTransaction) -> Result<CommitReceipt> {
        for envelope in &transaction.envelopes {
            envelope.mutation.validate()?;
        }

        let ops = transaction
            .envelopes
            .iter()
            .map(|envelope| envelope.mutation.to_store_op())
            .collect::<Vec<_>>();
        let committed = ops.len();
        self.store.apply_batch(ops)?;

        let batch = match self.outbound_batch(transaction) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "committed locally but cannot build push");
                self.events.emit(SyncEvent::PushFailed(e.to_string()));
                return Ok(CommitReceipt {
                    committed,
                    push: None,
                });
            }
        };
        if batch.is_empty() {
            tracing::debug!(committed, "nothing to push");
            return Ok(CommitReceipt {
                committed,
                push: None,
            });
        }

        Ok(CommitReceipt {
            committed,
            push: Some(self.spawn_push(batch)),
        })
    }

    fn spawn_push(&self, batch: OutboundBatch) -> PushHandle {
        let remote = Arc::clone(&self.remote);
        let events = self.events.clone();
        let pushed = batch.len();

        let handle = tokio::spawn(async move {
            match remote.push_batch(batch).await {
                Ok(()) => {
                    tracing::debug!(pushed, "pushed local changes");
                    events.emit(SyncEvent::PushCompleted { pushed });
                    Ok(pushed)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to push local changes");
                    events.emit(SyncEvent::PushFailed(e.to_string()));
                    Err(e)
                }
            }
        });

        PushHandle { handle }
    }

    /// Build the upstream form of the synced mutations. Passwords are
    /// stripped for records that do not sync them; the store keeps them.
    fn outbound_batch(&self, transaction: LocalTransaction) -> Result<OutboundBatch> {
        let mut batch = OutboundBatch::default();

        for envelope in transaction.envelopes {
            if !envelope.cloud_sync {
                continue;
            }
            match envelope.mutation {
                LocalMutation::Insert(record) => {
                    batch.creates.push(record.for_transport()?);
                }
                LocalMutation::Update { id, changes } => {
                    let committed = self.store.get(id)?;
                    batch.updates.push(OutboundUpdate {
                        id,
                        changes: transport_changes(changes, committed.as_ref())?,
                    });
                }
                LocalMutation::Delete(id) => batch.removes.push(id),
            }
        }

        Ok(batch)
    }
}

/// Changes as sent upstream. A changed connection string, or a changed sync
/// mode, sends the connection string in the form the record's mode allows.
fn transport_changes(
    mut changes: ConnectionChanges,
    committed: Option<&ConnectionRecord>,
) -> Result<ConnectionChanges> {
    let touches_credentials = changes.connection_string.is_some() || changes.sync_mode.is_some();

    match committed {
        Some(record) => {
            if touches_credentials {
                changes.connection_string = Some(record.transport_connection_string()?);
            }
            changes.updated_at = Some(record.updated_at);
        }
        // Deleted later in the same transaction.
        None => {
            let sync_mode = changes.sync_mode.unwrap_or(SyncMode::CloudWithoutPassword);
            if let Some(raw) = changes.connection_string.take() {
                changes.connection_string = Some(match sync_mode {
                    SyncMode::Cloud => raw,
                    SyncMode::CloudWithoutPassword => {
                        zqlz_core::connection_string::without_password(&raw)?
                    }
                });
            }
        }
    }

    Ok(changes)
}
