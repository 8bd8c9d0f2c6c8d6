//! Connection records and the shapes they take on the wire

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::connection_string::{self, ConnectionUrl};
use crate::{DatabaseType, Result, SyncMode};

/// A saved database connection, as held by the local record store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub name: String,
    pub connection_type: DatabaseType,
    pub connection_string: String,
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Whether the canonical record has ever carried a password
    #[serde(default)]
    pub password_ever_configured: bool,
    pub label: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Create a new record. The connection string is validated and trimmed.
    pub fn new(
        name: impl Into<String>,
        connection_type: DatabaseType,
        connection_string: &str,
    ) -> Result<Self> {
        let url = ConnectionUrl::parse(connection_string)?;
        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            connection_type,
            connection_string: url.to_string(),
            sync_mode: SyncMode::default(),
            password_ever_configured: url.has_password(),
            label: None,
            color: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Whether the local connection string carries a non-empty password.
    /// Always derived from the string; never stored.
    pub fn password_present_locally(&self) -> bool {
        match connection_string::has_password(&self.connection_string) {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(record_id = %self.id, error = %e, "stored connection string does not parse");
                false
            }
        }
    }

    /// A password is known to exist but this device does not have it
    pub fn needs_password(&self) -> bool {
        self.password_ever_configured && !self.password_present_locally()
    }

    /// Bump `updated_at`, never moving it backwards
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Apply a partial edit and bump `updated_at`. A connection string in
    /// `changes` must parse, otherwise the record is left untouched.
    pub fn apply_changes(&mut self, changes: &ConnectionChanges) -> Result<()> {
        let connection_string = match &changes.connection_string {
            Some(raw) => Some(ConnectionUrl::parse(raw)?.to_string()),
            None => None,
        };

        if let Some(name) = &changes.name {
            self.name = name.clone();
        }
        if let Some(connection_string) = connection_string {
            self.connection_string = connection_string;
        }
        if let Some(sync_mode) = changes.sync_mode {
            self.sync_mode = sync_mode;
        }
        if let Some(ever) = changes.password_ever_configured {
            self.password_ever_configured = ever;
        }
        if let Some(label) = &changes.label {
            self.label = label.clone();
        }
        if let Some(color) = &changes.color {
            self.color = color.clone();
        }
        self.touch();
        Ok(())
    }

    /// The connection string as it may leave the device
    pub fn transport_connection_string(&self) -> Result<String> {
        match self.sync_mode {
            SyncMode::Cloud => Ok(self.connection_string.clone()),
            SyncMode::CloudWithoutPassword => {
                connection_string::without_password(&self.connection_string)
            }
        }
    }

    /// Build the copy sent to the remote store. The password is removed
    /// unless the record's sync mode allows it to be synchronized.
    pub fn for_transport(&self) -> Result<ConnectionRecordForTransport> {
        Ok(ConnectionRecordForTransport {
            id: self.id,
            name: self.name.clone(),
            connection_type: self.connection_type,
            connection_string: self.transport_connection_string()?,
            sync_mode: Some(self.sync_mode),
            password_ever_configured: self.password_ever_configured,
            label: self.label.clone(),
            color: self.color.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn snapshot_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            id: self.id,
            updated_at: self.updated_at,
        }
    }
}

/// A connection record as exchanged with the remote store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecordForTransport {
    pub id: Uuid,
    pub name: String,
    pub connection_type: DatabaseType,
    pub connection_string: String,
    /// Older remote payloads may omit the sync mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<SyncMode>,
    #[serde(default)]
    pub password_ever_configured: bool,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecordForTransport {
    /// Effective sync mode, falling back to the password-less default
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode.unwrap_or_default()
    }

    /// Convert into a local record, keeping the connection string as sent
    pub fn into_record(self) -> ConnectionRecord {
        let sync_mode = self.sync_mode();
        ConnectionRecord {
            id: self.id,
            name: self.name,
            connection_type: self.connection_type,
            connection_string: self.connection_string,
            sync_mode,
            password_ever_configured: self.password_ever_configured,
            label: self.label,
            color: self.color,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A partial edit of a connection record.
///
/// `None` leaves a field alone. For the optional cosmetic fields,
/// `Some(None)` clears the value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<SyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_ever_configured: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub label: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub color: Option<Option<String>>,
    /// Set by the outbox from the committed record; ignored when applied locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConnectionChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    pub fn sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = Some(sync_mode);
        self
    }

    pub fn password_ever_configured(mut self, ever: bool) -> Self {
        self.password_ever_configured = Some(ever);
        self
    }

    pub fn label(mut self, label: Option<String>) -> Self {
        self.label = Some(label);
        self
    }

    pub fn color(mut self, color: Option<String>) -> Self {
        self.color = Some(color);
        self
    }

    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.connection_string.is_none()
            && self.sync_mode.is_none()
            && self.password_ever_configured.is_none()
            && self.label.is_none()
            && self.color.is_none()
    }
}

/// Distinguishes an explicit `null` from a missing field
fn deserialize_present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// The `{id, updated_at}` pair the remote store diffs against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
}

/// One operation of a remote diff, applied in the order received
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RemoteChange {
    Insert(ConnectionRecordForTransport),
    Update(ConnectionRecordForTransport),
    Delete(Uuid),
}

impl RemoteChange {
    pub fn id(&self) -> Uuid {
        match self {
            RemoteChange::Insert(record) | RemoteChange::Update(record) => record.id,
            RemoteChange::Delete(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteChange::Insert(_) => "insert",
            RemoteChange::Update(_) => "update",
            RemoteChange::Delete(_) => "delete",
        }
    }
}
