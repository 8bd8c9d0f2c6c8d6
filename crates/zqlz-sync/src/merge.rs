//! Credential-preserving merge of remote changes into local records
//!
//! When a record is synced without its password, the cloud copy has no
//! password but this device may have one. Applying the remote record as-is
//! would wipe it, so the local password is put back into the incoming
//! connection string. A password that does arrive from the cloud always wins.

use uuid::Uuid;
use zqlz_core::connection_string::{has_password, password_of, with_password};
use zqlz_core::{
    ConnectionRecord, ConnectionRecordForTransport, RemoteChange, Result, SyncMode, ZqlzError,
};

/// What to write to the local store for one remote change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Upsert {
        record: ConnectionRecord,
        password_present_locally: bool,
    },
    Delete {
        id: Uuid,
    },
}

impl MergeOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            MergeOutcome::Upsert { record, .. } => record.id,
            MergeOutcome::Delete { id } => *id,
        }
    }
}

/// Resolve a remote change against the local copy of the same record.
///
/// Updates and deletes of a record that does not exist locally fail with
/// [`ZqlzError::RecordNotFound`]. An insert of a record that already exists
/// locally is merged like an update. Connection strings that do not parse
/// fail with [`ZqlzError::InvalidConnectionString`].
pub fn resolve(local: Option<&ConnectionRecord>, change: RemoteChange) -> Result<MergeOutcome> {
    match change {
        RemoteChange::Insert(incoming) => match local {
            Some(local) => {
                tracing::debug!(record_id = %incoming.id, "remote insert of a known record");
                merge_onto(local, incoming)
            }
            None => upsert(incoming.into_record()),
        },
        RemoteChange::Update(incoming) => {
            let local = local.ok_or(ZqlzError::RecordNotFound(incoming.id))?;
            merge_onto(local, incoming)
        }
        RemoteChange::Delete(id) => match local {
            Some(_) => Ok(MergeOutcome::Delete { id }),
            None => Err(ZqlzError::RecordNotFound(id)),
        },
    }
}

/// Take the incoming record, keeping the local password when the cloud copy
/// was stripped of it. A missing sync mode counts as password-less.
fn merge_onto(
    local: &ConnectionRecord,
    incoming: ConnectionRecordForTransport,
) -> Result<MergeOutcome> {
    let sync_mode = incoming.sync_mode();
    let cloud_has_password = has_password(&incoming.connection_string)?;
    let local_password = password_of(&local.connection_string)?;

    let mut record = incoming.into_record();
    if sync_mode == SyncMode::CloudWithoutPassword
        && !cloud_has_password
        && let Some(password) = local_password
    {
        tracing::trace!(record_id = %record.id, "keeping local password");
        record.connection_string = with_password(&record.connection_string, &password)?;
    }
    upsert(record)
}

fn upsert(record: ConnectionRecord) -> Result<MergeOutcome> {
    let password_present_locally = has_password(&record.connection_string)?;
    Ok(MergeOutcome::Upsert {
        record,
        password_present_locally,
    })
}
