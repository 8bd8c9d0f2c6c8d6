//! Local persistence for connection records
//!
//! The sync engine only ever talks to the [`RecordStore`] trait. The
//! SQLite-backed [`SqliteRecordStore`] is the implementation used by the app.

mod sqlite_store;

pub use sqlite_store::SqliteRecordStore;

use uuid::Uuid;
use zqlz_core::{ConnectionChanges, ConnectionRecord, Result, SnapshotEntry};

/// A single write against the record store
#[derive(Clone, Debug, PartialEq)]
pub enum StoreOp {
    /// Insert the record, replacing any row with the same id
    Upsert(ConnectionRecord),
    /// Apply a partial edit to an existing record and bump its `updated_at`
    Update { id: Uuid, changes: ConnectionChanges },
    /// Remove an existing record
    Delete(Uuid),
}

impl StoreOp {
    pub fn id(&self) -> Uuid {
        match self {
            StoreOp::Upsert(record) => record.id,
            StoreOp::Update { id, .. } | StoreOp::Delete(id) => *id,
        }
    }
}

/// Durable table of connection records keyed by id.
///
/// Updates and deletes of an unknown id fail with
/// [`zqlz_core::ZqlzError::RecordNotFound`].
pub trait RecordStore: Send + Sync {
    fn get(&self, id: Uuid) -> Result<Option<ConnectionRecord>>;

    fn upsert(&self, record: &ConnectionRecord) -> Result<()>;

    fn delete(&self, id: Uuid) -> Result<()>;

    fn list_all(&self) -> Result<Vec<ConnectionRecord>>;

    /// `{id, updated_at}` for every stored record
    fn snapshot(&self) -> Result<Vec<SnapshotEntry>>;

    /// Apply every op in one transaction. Either all of them commit or none do.
    fn apply_batch(&self, ops: Vec<StoreOp>) -> Result<()>;

    /// Load the record, let `decide` pick the write, and apply it, all in
    /// one transaction. No other write can land between the read and the
    /// write. Nothing is written when `decide` fails.
    fn modify(
        &self,
        id: Uuid,
        decide: Box<dyn FnOnce(Option<&ConnectionRecord>) -> Result<StoreOp> + '_>,
    ) -> Result<()>;

    fn apply(&self, op: StoreOp) -> Result<()> {
        self.apply_batch(vec![op])
    }
}
