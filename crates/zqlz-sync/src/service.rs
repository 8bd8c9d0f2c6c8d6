//! Connection sync service
//!
//! Wires the record store, the outbox and the reconciliation engine together
//! and exposes the edits the app makes to saved connections.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;
use zqlz_core::connection_string::{self, encode_credential};
use zqlz_core::{
    ConnectionChanges, ConnectionRecord, DatabaseType, Result, SyncMode, ZqlzError,
};
use zqlz_internal_storage::{RecordStore, SqliteRecordStore};

use crate::config::SyncConfig;
use crate::engine::{CycleOutcome, ReconciliationEngine};
use crate::events::{EventBus, SyncEvent, SyncTrigger};
use crate::http::HttpRemoteStore;
use crate::outbox::{
    CommitReceipt, LocalMutation, LocalTransaction, MutationEnvelope, MutationOutbox,
};
use crate::remote::{RemoteStore, SessionState};
use crate::scheduler::SyncScheduler;

pub struct ConnectionSyncService {
    store: Arc<dyn RecordStore>,
    outbox: MutationOutbox,
    engine: Arc<ReconciliationEngine>,
    events: EventBus,
}

impl ConnectionSyncService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionState>,
    ) -> Self {
        let events = EventBus::new();
        let outbox = MutationOutbox::new(store.clone(), remote.clone(), events.clone());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            remote,
            session,
            events.clone(),
        ));

        Self {
            store,
            outbox,
            engine,
            events,
        }
    }

    /// Open the SQLite store and the HTTP remote described by `config`
    pub fn from_config(config: &SyncConfig, session: Arc<dyn SessionState>) -> Result<Self> {
        let store = SqliteRecordStore::with_path(config.resolved_store_path()?)?;
        let remote = HttpRemoteStore::from_config(config, session.clone())?;
        Ok(Self::new(Arc::new(store), Arc::new(remote), session))
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Start the background scheduler, running a first cycle if configured
    pub fn start_scheduler(&self, config: &SyncConfig) -> SyncScheduler {
        let scheduler = SyncScheduler::start(self.engine.clone(), config.sync_interval());
        if config.sync_on_startup && !scheduler.try_trigger(SyncTrigger::Startup) {
            tracing::warn!("could not queue startup sync");
        }
        scheduler
    }

    fn commit(&self, transaction: LocalTransaction) -> Result<CommitReceipt> {
        self.outbox.commit(transaction)
    }

    fn require(&self, id: Uuid) -> Result<ConnectionRecord> {
        self.store.get(id)?.ok_or(ZqlzError::RecordNotFound(id))
    }

    /// Save a new connection. The database type is detected from the
    /// connection string's scheme.
    #[tracing::instrument(skip(self, connection_string))]
    pub fn create_connection(
        &self,
        name: &str,
        connection_string: &str,
        sync_mode: SyncMode,
    ) -> Result<(ConnectionRecord, CommitReceipt)> {
        let url = connection_string::ConnectionUrl::parse(connection_string)?;
        let connection_type = DatabaseType::from_connection_string(connection_string).ok_or_else(
            || {
                ZqlzError::InvalidConnectionString(format!(
                    "unsupported database scheme: {}",
                    url.scheme()
                ))
            },
        )?;

        let record = ConnectionRecord::new(name, connection_type, connection_string)?
            .with_sync_mode(sync_mode);
        tracing::info!(record_id = %record.id, target = %url.redacted(), "creating connection");

        let receipt = self.commit(LocalTransaction::new().insert(record.clone()))?;
        Ok((record, receipt))
    }

    pub fn rename(&self, id: Uuid, name: &str) -> Result<CommitReceipt> {
        self.commit(LocalTransaction::new().update(id, ConnectionChanges::new().name(name)))
    }

    pub fn set_label(&self, id: Uuid, label: Option<String>) -> Result<CommitReceipt> {
        self.commit(LocalTransaction::new().update(id, ConnectionChanges::new().label(label)))
    }

    pub fn set_color(&self, id: Uuid, color: Option<String>) -> Result<CommitReceipt> {
        self.commit(LocalTransaction::new().update(id, ConnectionChanges::new().color(color)))
    }

    /// Store a password typed by the user. An empty password removes it.
    ///
    /// For records that do not sync passwords the new connection string
    /// stays on this device; only the fact that a password exists is sent.
    #[tracing::instrument(skip(self, password))]
    pub fn set_password(&self, id: Uuid, password: &str) -> Result<CommitReceipt> {
        let record = self.require(id)?;
        let raw = if password.is_empty() {
            connection_string::without_password(&record.connection_string)?
        } else {
            connection_string::with_password(
                &record.connection_string,
                &encode_credential(password),
            )?
        };

        let string_change = ConnectionChanges::new().connection_string(raw);
        let ever_configured = record.password_ever_configured || !password.is_empty();

        let transaction = match record.sync_mode {
            SyncMode::Cloud => LocalTransaction::new().update(
                id,
                string_change.password_ever_configured(ever_configured),
            ),
            SyncMode::CloudWithoutPassword => {
                let mut transaction = LocalTransaction::new().push(MutationEnvelope::local_only(
                    LocalMutation::Update {
                        id,
                        changes: string_change,
                    },
                ));
                if ever_configured != record.password_ever_configured {
                    transaction = transaction.update(
                        id,
                        ConnectionChanges::new().password_ever_configured(ever_configured),
                    );
                }
                transaction
            }
        };

        self.commit(transaction)
    }

    /// Change whether the password is synchronized. Switching to
    /// [`SyncMode::CloudWithoutPassword`] removes it from the cloud copy.
    pub fn set_sync_mode(&self, id: Uuid, sync_mode: SyncMode) -> Result<CommitReceipt> {
        self.commit(LocalTransaction::new().update(id, ConnectionChanges::new().sync_mode(sync_mode)))
    }

    pub fn remove(&self, id: Uuid) -> Result<CommitReceipt> {
        tracing::info!(record_id = %id, "removing connection");
        self.commit(LocalTransaction::new().delete(id))
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ConnectionRecord>> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<ConnectionRecord>> {
        self.store.list_all()
    }

    /// Whether the user has to enter a password before connecting
    pub fn needs_password(&self, id: Uuid) -> Result<bool> {
        Ok(self.require(id)?.needs_password())
    }

    pub async fn sync_now(&self) -> Result<CycleOutcome> {
        self.engine.run_cycle(SyncTrigger::Manual).await
    }

    /// Completes when the current reconciliation cycle has finished
    pub fn wait_for_sync(&self) -> impl Future<Output = ()> + Send + 'static {
        self.engine.wait_for_current_cycle()
    }

    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}
