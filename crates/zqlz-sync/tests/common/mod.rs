//! Common test utilities and fakes

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use zqlz_core::{
    ConnectionChanges, ConnectionRecord, ConnectionRecordForTransport, DatabaseType,
    RemoteChange, Result, SnapshotEntry, SyncMode, ZqlzError,
};
use zqlz_internal_storage::SqliteRecordStore;
use zqlz_sync::{ConnectionSyncService, RemoteStore, StaticSession};

static INIT: Once = Once::new();

/// Install a test subscriber once. Use `RUST_LOG=zqlz_sync=trace` to see output.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive("zqlz_sync=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// In-memory cloud copy of the connection collection.
///
/// `diff` compares the local snapshot with its own records: unknown ids come
/// back as inserts, newer cloud copies as updates, and ids removed from the
/// cloud as deletes.
#[derive(Default)]
pub struct FakeRemote {
    records: Mutex<BTreeMap<Uuid, ConnectionRecordForTransport>>,
    tombstones: Mutex<HashSet<Uuid>>,
    scripted: Mutex<Option<Vec<RemoteChange>>>,
    /// Every connection string received through create/update
    pub received_strings: Mutex<Vec<String>>,
    pub diff_calls: AtomicUsize,
    pub fail_diff: AtomicBool,
    pub fail_push: AtomicBool,
    diff_delay: Mutex<Option<Duration>>,
    diffs_in_flight: AtomicUsize,
    max_diffs_in_flight: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store a record directly in the cloud, as another device would
    pub fn put(&self, record: ConnectionRecordForTransport) {
        self.records.lock().insert(record.id, record);
    }

    pub fn get(&self, id: Uuid) -> Option<ConnectionRecordForTransport> {
        self.records.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Delete a record in the cloud, as another device would
    pub fn delete(&self, id: Uuid) {
        self.records.lock().remove(&id);
        self.tombstones.lock().insert(id);
    }

    /// Return exactly these changes from the next diff
    pub fn script(&self, changes: Vec<RemoteChange>) {
        *self.scripted.lock() = Some(changes);
    }

    pub fn set_diff_delay(&self, delay: Duration) {
        *self.diff_delay.lock() = Some(delay);
    }

    pub fn diff_calls(&self) -> usize {
        self.diff_calls.load(Ordering::SeqCst)
    }

    /// Highest number of diff calls that were running at the same time
    pub fn max_diffs_in_flight(&self) -> usize {
        self.max_diffs_in_flight.load(Ordering::SeqCst)
    }

    fn compute_diff(&self, snapshot: &[SnapshotEntry]) -> Vec<RemoteChange> {
        let records = self.records.lock();
        let tombstones = self.tombstones.lock();
        let local: BTreeMap<Uuid, _> = snapshot.iter().map(|e| (e.id, e.updated_at)).collect();

        let mut changes = Vec::new();
        for (id, record) in records.iter() {
            match local.get(id) {
                None => changes.push(RemoteChange::Insert(record.clone())),
                Some(updated_at) if record.updated_at > *updated_at => {
                    changes.push(RemoteChange::Update(record.clone()))
                }
                Some(_) => {}
            }
        }
        for entry in snapshot {
            if tombstones.contains(&entry.id) {
                changes.push(RemoteChange::Delete(entry.id));
            }
        }
        changes
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn diff(&self, snapshot: &[SnapshotEntry]) -> Result<Vec<RemoteChange>> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.diffs_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_diffs_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.diff_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.diffs_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_diff.load(Ordering::SeqCst) {
            return Err(ZqlzError::Transport("remote unavailable".to_string()));
        }

        if let Some(changes) = self.scripted.lock().take() {
            return Ok(changes);
        }
        Ok(self.compute_diff(snapshot))
    }

    async fn create(&self, record: ConnectionRecordForTransport) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(ZqlzError::Transport("remote unavailable".to_string()));
        }
        self.received_strings
            .lock()
            .push(record.connection_string.clone());
        self.put(record);
        Ok(())
    }

    async fn update(&self, id: Uuid, changes: ConnectionChanges) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(ZqlzError::Transport("remote unavailable".to_string()));
        }
        if let Some(raw) = &changes.connection_string {
            self.received_strings.lock().push(raw.clone());
        }

        let mut records = self.records.lock();
        let record = records.get_mut(&id).ok_or(ZqlzError::RecordNotFound(id))?;
        if let Some(name) = changes.name {
            record.name = name;
        }
        if let Some(raw) = changes.connection_string {
            record.connection_string = raw;
        }
        if let Some(sync_mode) = changes.sync_mode {
            record.sync_mode = Some(sync_mode);
        }
        if let Some(ever) = changes.password_ever_configured {
            record.password_ever_configured = ever;
        }
        if let Some(label) = changes.label {
            record.label = label;
        }
        if let Some(color) = changes.color {
            record.color = color;
        }
        if let Some(updated_at) = changes.updated_at {
            record.updated_at = updated_at;
        }
        Ok(())
    }

    async fn remove(&self, ids: Vec<Uuid>) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(ZqlzError::Transport("remote unavailable".to_string()));
        }
        for id in ids {
            self.delete(id);
        }
        Ok(())
    }
}

/// A fully wired service over an in-memory store and a fake remote
pub struct TestDevice {
    pub store: Arc<SqliteRecordStore>,
    pub session: Arc<StaticSession>,
    pub service: ConnectionSyncService,
}

impl TestDevice {
    pub fn new(remote: Arc<FakeRemote>) -> Self {
        init_tracing();
        let store = Arc::new(SqliteRecordStore::in_memory().unwrap());
        let session = Arc::new(StaticSession::authenticated("test-token"));
        let service = ConnectionSyncService::new(store.clone(), remote, session.clone());
        Self {
            store,
            session,
            service,
        }
    }
}

pub fn postgres_record(name: &str, raw: &str, sync_mode: SyncMode) -> ConnectionRecord {
    ConnectionRecord::new(name, DatabaseType::Postgres, raw)
        .unwrap()
        .with_sync_mode(sync_mode)
}
